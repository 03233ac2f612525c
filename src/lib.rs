// ==============================================================================
// lib.rs - varmt-db Library
// ==============================================================================
// Description: VCF ingestion into a relational variant-frequency store
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

pub mod config;
pub mod genotype;
pub mod ledger;
pub mod linker;
pub mod models;
pub mod parsers;
pub mod pipeline;
pub mod resolver;
pub mod store;
