//! Flow profiles file.
//!
//! A CSV file with a header row naming its columns, in any order. Times are in milliseconds
//! since the epoch, protocols are given by number (4/6 for the network layer, 6/17/1/58 for
//! the transport layer). The IP columns are optional and may be left empty.

use crate::error::{Error, Result};
use crate::structs::*;

use std::fs;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    StartTime,
    EndTime,
    L3Proto,
    L4Proto,
    SrcIp,
    DstIp,
    SrcPort,
    DstPort,
    Packets,
    Bytes,
    PacketsRev,
    BytesRev,
}

impl Column {
    const ALL: [Column; 12] = [
        Column::StartTime,
        Column::EndTime,
        Column::L3Proto,
        Column::L4Proto,
        Column::SrcIp,
        Column::DstIp,
        Column::SrcPort,
        Column::DstPort,
        Column::Packets,
        Column::Bytes,
        Column::PacketsRev,
        Column::BytesRev,
    ];

    fn name(&self) -> &'static str {
        match self {
            Column::StartTime => "START_TIME",
            Column::EndTime => "END_TIME",
            Column::L3Proto => "L3_PROTO",
            Column::L4Proto => "L4_PROTO",
            Column::SrcIp => "SRC_IP",
            Column::DstIp => "DST_IP",
            Column::SrcPort => "SRC_PORT",
            Column::DstPort => "DST_PORT",
            Column::Packets => "PACKETS",
            Column::Bytes => "BYTES",
            Column::PacketsRev => "PACKETS_REV",
            Column::BytesRev => "BYTES_REV",
        }
    }

    fn is_optional(&self) -> bool {
        matches!(self, Column::SrcIp | Column::DstIp)
    }
}

/// Positions of the known columns in a row
struct Header {
    positions: Vec<(Column, Option<usize>)>,
}

impl Header {
    fn parse(line: &str) -> Result<Header> {
        let names: Vec<&str> = line.split(',').map(|name| name.trim()).collect();
        let mut positions = Vec::with_capacity(Column::ALL.len());
        for column in Column::ALL {
            let position = names.iter().position(|name| *name == column.name());
            if position.is_none() && !column.is_optional() {
                return Err(Error::Profile {
                    line: 1,
                    reason: format!("missing column {}", column.name()),
                });
            }
            positions.push((column, position));
        }
        Ok(Header { positions })
    }

    fn field<'a>(&self, fields: &[&'a str], column: Column) -> Option<&'a str> {
        self.positions
            .iter()
            .find(|(c, _)| *c == column)
            .and_then(|(_, position)| *position)
            .and_then(|position| fields.get(position).copied())
    }
}

fn parse_value<T: FromStr>(value: Option<&str>, column: Column) -> std::result::Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let value = value.ok_or_else(|| format!("missing value for {}", column.name()))?;
    value
        .parse()
        .map_err(|e| format!("invalid {} \"{value}\": {e}", column.name()))
}

fn parse_ip(value: Option<&str>, column: Column) -> std::result::Result<Option<IpAddr>, String> {
    match value {
        None | Some("") => Ok(None),
        Some(_) => parse_value(value, column).map(Some),
    }
}

fn parse_row(header: &Header, line: &str) -> std::result::Result<FlowProfile, String> {
    let fields: Vec<&str> = line.split(',').map(|field| field.trim()).collect();
    let get = |column| header.field(&fields, column);

    let l3: u8 = parse_value(get(Column::L3Proto), Column::L3Proto)?;
    let l4: u8 = parse_value(get(Column::L4Proto), Column::L4Proto)?;
    let profile = FlowProfile {
        start_time: Duration::from_millis(parse_value(get(Column::StartTime), Column::StartTime)?),
        end_time: Duration::from_millis(parse_value(get(Column::EndTime), Column::EndTime)?),
        l3_proto: L3Protocol::from_protocol_number(l3),
        l4_proto: L4Protocol::from_protocol_number(l4),
        src_ip: parse_ip(get(Column::SrcIp), Column::SrcIp)?,
        dst_ip: parse_ip(get(Column::DstIp), Column::DstIp)?,
        src_port: parse_value(get(Column::SrcPort), Column::SrcPort)?,
        dst_port: parse_value(get(Column::DstPort), Column::DstPort)?,
        packets: parse_value(get(Column::Packets), Column::Packets)?,
        bytes: parse_value(get(Column::Bytes), Column::Bytes)?,
        packets_rev: parse_value(get(Column::PacketsRev), Column::PacketsRev)?,
        bytes_rev: parse_value(get(Column::BytesRev), Column::BytesRev)?,
    };

    if profile.end_time < profile.start_time {
        return Err("END_TIME is before START_TIME".to_string());
    }
    Ok(profile)
}

/// Parse a profiles file and sort the profiles by start time
pub fn parse_profiles(input: &str) -> Result<Vec<FlowProfile>> {
    let mut lines = input.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
    let Some((_, header)) = lines.next() else {
        return Ok(vec![]);
    };
    let header = Header::parse(header)?;

    let mut profiles = vec![];
    for (i, line) in lines {
        let profile = parse_row(&header, line).map_err(|reason| Error::Profile {
            line: i + 1,
            reason,
        })?;
        profiles.push(profile);
    }
    // stable, so that flows starting together keep their file order
    profiles.sort_by_key(|p| p.start_time);
    Ok(profiles)
}

pub fn load_profiles(path: &str) -> Result<Vec<FlowProfile>> {
    let profiles = parse_profiles(&fs::read_to_string(path)?)?;
    log::info!("{} flow profiles loaded from {path}", profiles.len());
    Ok(profiles)
}
