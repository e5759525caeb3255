pub mod keyvec;
