#[allow(non_snake_case)]
pub mod Examples;
#[allow(non_snake_case)]
pub mod Preparation;
pub mod drug_catalog;
pub mod protocol_config;
