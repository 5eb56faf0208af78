//! # rx-misid
//!
//! Data-driven background estimate for hadrons misidentified as leptons.
//!
//! This crate provides:
//! - [`SampleSplitter`], which partitions events into the PassFail / FailPass / FailFail
//!   tagging regions for one hadron species and charge hypothesis.
//! - [`SampleWeighter`], per-event transfer factors and PID efficiencies from binned maps.
//! - [`MisidCombiner`], the signed inclusion-exclusion union of the regions.
//! - [`DensityEstimator`], a bounded weighted KDE returning a [`DensityModel`].
//! - [`MisIdCalculator`] and [`PdfMaker`], which run the full pipeline from a
//!   [`MisidConfig`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod calculator;
pub mod combiner;
pub mod config;
pub mod density;
pub mod efficiency;
pub mod pdf_maker;
pub mod splitter;
pub mod summary;
pub mod weighter;

mod kde;

pub use calculator::{BMESON_COLUMN, MisIdCalculator};
pub use combiner::{CombinationRule, MisidCombiner, Sign};
pub use config::{Bandwidth, DensityConfig, FactorKind, Leg, MisidConfig};
pub use density::{DensityEstimator, DensityModel, WeightedData};
pub use efficiency::{EfficiencyMap, EfficiencyMaps};
pub use pdf_maker::PdfMaker;
pub use splitter::{CutFlow, RegionTables, SampleSplitter};
pub use summary::{GroupYield, YieldSummary};
pub use weighter::SampleWeighter;
