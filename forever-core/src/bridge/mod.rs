pub mod abi;
pub mod callback;
