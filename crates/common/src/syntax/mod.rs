/*
 * vAuth mail authentication library
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

//! Byte-oriented scanners and allocating parsers for the ABNF productions
//! shared by SPF, DKIM, ADSP, ATPS and DMARC.
//!
//! Scanners have the contract `scan(input) -> matched_length`: zero means
//! "no match", a positive value is the number of bytes consumed from the
//! start of the input. Scanners never allocate and never fail. Parsers
//! additionally append the semantic value (quoted-pairs interpreted, FWS
//! collapsed) to a caller-provided buffer.

pub mod parse;
pub mod scan;
