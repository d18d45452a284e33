pub mod baseline;
pub mod run;
