// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Agent Trust Authors
pub mod agent_identifier;
pub mod config;
pub mod credential_store;
pub mod crypto;
pub mod error;
pub mod file_ops;
pub mod https_client;
pub mod identity_material;
pub mod registration;
pub mod ssl_infrastructure;
pub mod transport;
