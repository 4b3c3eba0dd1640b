pub mod accumulator;
pub mod container;
pub mod domain;
pub mod error;
pub mod estimators;
pub mod integrator;
pub mod io;
pub mod moves;
pub mod observable;
pub mod pdf;
pub mod reduce;
pub mod walker;
