#![allow(dead_code)]

#[macro_use]
extern crate serde_derive;

#[cfg(test)]
extern crate pretty_assertions;

pub mod assembler;
pub mod binary_literal;
pub mod cpu;
pub mod executable;
pub mod expr;
pub mod linker;
pub mod object_file;
pub mod opcode;
pub mod syscall;
