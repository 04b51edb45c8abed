pub mod deepinfra;
