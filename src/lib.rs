//! Static immutability analysis for compiled JVM classes.
//!
//! A [`session::AnalysisSession`] runs a battery of checkers over each class
//! read from a [`source::ClassSource`] and aggregates their reasons into a
//! [`model::Verdict`].

mod cfg;
pub mod checkers;
pub mod classfile;
pub mod config;
mod dataflow;
mod descriptor;
pub mod hierarchy;
pub mod ir;
mod jdk;
pub mod model;
pub mod names;
mod opcodes;
pub mod report;
pub mod scan;
pub mod session;
pub mod source;

#[cfg(test)]
mod testing;
