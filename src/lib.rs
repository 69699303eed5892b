//! Trustpoint Client - Device-side onboarding and DevID lifecycle library
//!
//! Brings a device into one or more Trustpoint domains and manages the
//! certificates it holds there. A domain is entered once, either through the
//! OTP-authenticated onboarding handshake or by importing an LDevID issued out
//! of band. Afterwards the domain credential authenticates requests for
//! further certificates.
//!
//! # Overview
//!
//! ```text
//! provision_auto / provision_manual
//!   └── Domain (config + LDevID "domain-credential")
//!         └── Generic credentials (request_generic via CMP)
//! ```
//!
//! Key and certificate bytes live in a [`devid_store::DevIdStore`]; the JSON
//! [`inventory::Inventory`] only refers to them by index.
//!
//! # Example
//!
//! ```no_run
//! use trustpoint_client::client::TrustpointClient;
//! use trustpoint_client::configs::AppConfig;
//! use secrecy::SecretString;
//! use anyhow::Result;
//!
//! fn main() -> Result<()> {
//!     let config = AppConfig::load()?;
//!     let mut client = TrustpointClient::from_config(&config)?;
//!     let otp = SecretString::from("abc123".to_string());
//!     let result = client.provision_auto(&otp, "dev-1", "trustpoint.local", 443, None)?;
//!     println!("{}", serde_json::to_string_pretty(&result)?);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`client`]: the [`client::TrustpointClient`] facade
//! - [`provision`]: trust bootstrap and manual LDevID import
//! - [`credentials`]: listing, deletion and export
//! - [`request`]: generic certificate requests
//! - [`inventory`], [`devid_store`]: persisted state
//! - [`transport`], [`enrollment`]: onboarding HTTPS calls and the CMP executor
//! - [`keys`], [`certificate`], [`subject`], [`serializer`], [`pkcs7`]: crypto helpers

pub mod certificate;
pub mod client;
pub mod configs;
pub mod credentials;
pub mod devid_store;
pub mod enrollment;
pub mod errors;
pub mod inventory;
pub mod keys;
pub mod pkcs7;
pub mod provision;
pub mod request;
pub mod schema;
pub mod serializer;
pub mod subject;
pub mod transport;

pub use client::TrustpointClient;
pub use errors::{ClientError, ClientResult};
