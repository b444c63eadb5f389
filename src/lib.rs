//! Bank and variant detection for Turkish payment-receipt PDFs.
//!
//! The pipeline: a [`pdf::ReceiptDocument`] supplies its normalized text layer,
//! [`detector::BankDetector`] matches bank domains and name markers (falling
//! back to first-page OCR for allowlisted banks), and
//! [`variant::VariantResolver`] picks the receipt sub-format and parser key.

pub mod config;
pub mod detector;
pub mod domain;
pub mod fingerprint;
pub mod normalize;
pub mod ocr;
pub mod pdf;
pub mod registry;
pub mod variant;
