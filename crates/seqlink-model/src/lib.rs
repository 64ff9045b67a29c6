// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod document;
pub mod last_run;

pub use document::{
    xref_url, Accessibility, Attribute, BioProjectDoc, BioSampleDoc, Distribution, ExternalLink,
    Grant, GrantAgency, JgaDoc, ObjectType, Organism, Organization, Publication, SampleModel,
    SamplePackage, SraDoc, Status, Xref, SEARCH_BASE_URL,
};
pub use last_run::{Family, LastRun};

pub const CRATE_NAME: &str = "seqlink-model";
