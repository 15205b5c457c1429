//! Browsing logic for folio.
//!
//! This module contains the [`model::DirectoryListingModel`], the
//! [`worker::IoWorker`] it lists on, navigation [`history::History`], row
//! [`sort`]ing and [`filter`]ing, and the snapshot [`reconcile`] diff.

pub mod filter;
pub mod history;
pub mod model;
pub mod reconcile;
pub mod sort;
pub mod worker;
