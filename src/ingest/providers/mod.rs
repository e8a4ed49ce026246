pub mod eset;
