//! nvidia-smi csv parsing
//!
//! Input is the output of
//! `nvidia-smi --query-gpu=index,utilization.gpu,memory.used,memory.total,temperature.gpu[,name] --format=csv,noheader,nounits`:
//! one GPU per line, comma separated, no header and no units.
//!
//! A single bad line fails the whole parse; a half-filled GPU table would be
//! shown as if it were complete.

use crate::models::GpuMetricRecord;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const REQUIRED_FIELDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: {detail}")]
    Malformed { line: usize, detail: String },
}

impl ParseError {
    fn malformed(line: usize, detail: impl Into<String>) -> Self {
        ParseError::Malformed {
            line,
            detail: detail.into(),
        }
    }
}

pub fn parse(raw: &str) -> Result<Vec<GpuMetricRecord>, ParseError> {
    let mut records = Vec::new();
    let mut seen = HashSet::new();

    for (i, line) in raw.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = parse_line(line, line_no)?;
        if !seen.insert(record.index) {
            return Err(ParseError::malformed(
                line_no,
                format!("duplicate GPU index {}", record.index),
            ));
        }
        records.push(record);
    }

    Ok(records)
}

fn parse_line(line: &str, line_no: usize) -> Result<GpuMetricRecord, ParseError> {
    // The name is last and may itself contain commas
    let fields: Vec<&str> = line.splitn(REQUIRED_FIELDS + 1, ',').map(str::trim).collect();
    if fields.len() < REQUIRED_FIELDS {
        return Err(ParseError::malformed(
            line_no,
            format!("expected {REQUIRED_FIELDS} fields, found {}", fields.len()),
        ));
    }

    let index: u32 = field(&fields, 0, "index", line_no)?;
    let utilization: u8 = field(&fields, 1, "utilization", line_no)?;
    let memory_used_mib: u64 = field(&fields, 2, "memory.used", line_no)?;
    let memory_total_mib: u64 = field(&fields, 3, "memory.total", line_no)?;
    let temperature_c: i32 = field(&fields, 4, "temperature", line_no)?;

    if utilization > 100 {
        return Err(ParseError::malformed(
            line_no,
            format!("utilization {utilization} is above 100"),
        ));
    }
    if memory_used_mib > memory_total_mib {
        return Err(ParseError::malformed(
            line_no,
            format!("memory used {memory_used_mib} exceeds total {memory_total_mib}"),
        ));
    }

    let name = fields
        .get(REQUIRED_FIELDS)
        .filter(|n| !n.is_empty())
        .map(|n| n.to_string());

    Ok(GpuMetricRecord {
        index,
        utilization,
        memory_used_mib,
        memory_total_mib,
        temperature_c,
        name,
    })
}

fn field<T>(fields: &[&str], pos: usize, what: &str, line_no: usize) -> Result<T, ParseError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let value = fields[pos];
    value
        .parse()
        .map_err(|e| ParseError::malformed(line_no, format!("{what} {value:?}: {e}")))
}
