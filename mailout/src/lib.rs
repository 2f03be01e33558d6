//! Form-to-email gateway
//!
//! Accepts HTML form POSTs, renders them into mail through operator supplied
//! templates, encrypts a copy for every recipient with a PGP key and delivers
//! everything over a single reusable SMTP session.

pub mod controller;
