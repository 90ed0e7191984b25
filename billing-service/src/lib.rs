//! salon-billing-service: bills, checkout and stock deduction for salon branches.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
