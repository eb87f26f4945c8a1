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

mod record;
mod result;
mod verify;

pub use record::{
    AlignmentMode, DmarcError, ReceiverPolicy, Record, ReportFormat, ReportingOption,
};
pub use result::Dmarc;
pub use verify::{verify, DmarcInput};
