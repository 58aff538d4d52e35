#![allow(dead_code)]

pub mod config;
pub mod gateway;
pub mod mock_vendor;
