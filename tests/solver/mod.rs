//! Solver tests: the Levenberg-Marquardt core on hand-written problems and the
//! curve-fitting helpers on peak models.

mod curve_fitting;
mod lm_problems;
