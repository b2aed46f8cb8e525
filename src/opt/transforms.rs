pub mod canonicalize;
pub mod cond_elim;
