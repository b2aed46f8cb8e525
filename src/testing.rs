//! Graphs and collaborators shared by the tests of this crate.

pub mod cases;
