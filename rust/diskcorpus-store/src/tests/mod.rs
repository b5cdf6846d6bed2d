

mod store_integration;
