//! Domain types, DTOs and the business rules that do not need a database.

pub mod admin;
pub mod api_accounts;
pub mod contracts;
pub mod gateways;
pub mod invoices;
pub mod notifications;
pub mod oauth;
pub mod pages;
pub mod tenants;
pub mod tickets;
pub mod users;
pub mod validation;
