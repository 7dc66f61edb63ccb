#![allow(dead_code)]

pub mod git;
pub mod process;
