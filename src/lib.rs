//! # netscanner
//!
//! Resumable network reconnaissance driven by nmap.
//!
//! A run discovers the live hosts of an address range, then takes each host
//! through port scanning, service detection, OS fingerprinting and a fixed
//! set of vulnerability checks. The list of hosts still to scan is
//! checkpointed to disk, so an interrupted run picks up where it stopped.
//!
//! ## Layout
//!
//! - [`nmap`]: process runner and output parser seams
//! - [`discovery`], [`scanner`], [`service`], [`os_detection`], [`checks`]:
//!   one stage each
//! - [`persistence`], [`resume`]: checkpoint storage and the resume decision
//! - [`orchestrator`]: the per-run state machine
//! - [`reporting`], [`license`]: collaborators at the edges
//! - [`core`]: stage traits, result model and the [`Application`] entry point

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod nmap;
pub mod target;
pub mod timing;

// Pipeline stages
pub mod checks;
pub mod discovery;
pub mod os_detection;
pub mod scanner;
pub mod service;

// Run control
pub mod orchestrator;
pub mod persistence;
pub mod resume;

// Collaborators
pub mod license;
pub mod reporting;

pub use crate::{
    config::AppConfig,
    core::{Application, HostResult, Run, RunOutcome},
    error::{Result, ScannerError},
    target::Target,
};
