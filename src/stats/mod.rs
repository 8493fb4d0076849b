// stats/mod.rs
// Statistical routines shared by the modeling and mapping stages.

pub mod corr;
pub mod ols;
