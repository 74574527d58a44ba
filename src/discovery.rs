//! Interface discovery and bus parameter readout
//!
//! Wraps the iproute2 `ip` tool. The parsers are plain functions over its
//! text output so they can be exercised without a CAN interface.

use std::fmt;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::{BusError, Result};

/// CAN interfaces present on the host, split by link type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InterfaceList {
    pub can: Vec<String>,
    pub vcan: Vec<String>,
}

impl InterfaceList {
    pub fn contains(&self, interface: &str) -> bool {
        self.is_physical(interface) || self.vcan.iter().any(|name| name == interface)
    }

    /// True for hardware `can` links, which carry bit-timing parameters.
    pub fn is_physical(&self, interface: &str) -> bool {
        self.can.iter().any(|name| name == interface)
    }
}

/// Bit timing and controller state of a physical interface.
///
/// All-zero for virtual interfaces or when the readout failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusParameters {
    pub mode: Vec<String>,
    pub bitrate: u64,
    pub sample_point: f64,
    pub state: String,
    pub restart_ms: u64,
    pub tq: u64,
    pub prop_seg: u8,
    pub phase_seg1: u8,
    pub phase_seg2: u8,
    pub sjw: u8,
}

impl fmt::Display for BusParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bitrate:       {}", self.bitrate)?;
        writeln!(f, "State:         {}", self.state)?;
        writeln!(f, "Restart in ms: {}", self.restart_ms)?;
        writeln!(f, "Sample Point:  {:.3}", self.sample_point)?;
        writeln!(f, "Mode:          {}", self.mode.join(","))?;
        writeln!(f, "TQ:            {}", self.tq)?;
        writeln!(f, "Prop-Seg:      {}", self.prop_seg)?;
        writeln!(f, "Phase-Seg-1:   {}", self.phase_seg1)?;
        writeln!(f, "Phase-Seg-2:   {}", self.phase_seg2)?;
        write!(f, "SJW:           {}", self.sjw)
    }
}

/// Names from `ip link show` output, e.g. `3: can0: <NOARP,UP> ...`.
pub fn parse_interface_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .filter_map(|line| {
            let (index, rest) = line.split_once(':')?;
            index.trim().parse::<u32>().ok()?;
            let name = rest.trim_start().split(':').next()?.trim();
            // Strip the `@parent` suffix of stacked links
            let name = name.split('@').next()?;
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// Flags of the first link in `ip link show` output, e.g. `["NOARP", "UP"]`.
pub fn parse_link_flags(output: &str) -> Vec<String> {
    let Some(line) = output.lines().next() else {
        return Vec::new();
    };
    match (line.find('<'), line.find('>')) {
        (Some(open), Some(close)) if open < close => line[open + 1..close]
            .split(',')
            .filter(|flag| !flag.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Parse `ip -details link show <can interface>` output.
pub fn parse_parameters(output: &str) -> Result<BusParameters> {
    let lines: Vec<&str> = output.lines().map(str::trim).collect();
    let can_line = lines
        .iter()
        .position(|line| line.starts_with("can ") || *line == "can")
        .ok_or_else(|| BusError::parse_error("bus parameters", "no 'can' details line"))?;

    let head: Vec<&str> = lines[can_line].split_whitespace().collect();
    let mut params = BusParameters {
        mode: head
            .iter()
            .find(|token| token.starts_with('<'))
            .map(|token| {
                token.trim_matches(|c| c == '<' || c == '>').split(',').map(str::to_string).collect()
            })
            .unwrap_or_default(),
        state: value_after(&head, "state")
            .ok_or_else(|| BusError::parse_error("bus parameters", "missing state"))?
            .to_string(),
        restart_ms: number_after(&head, "restart-ms")?,
        ..BusParameters::default()
    };

    if params.state == "STOPPED" {
        return Ok(BusParameters { state: params.state, ..BusParameters::default() });
    }

    let rest: Vec<&str> = lines[can_line + 1..].iter().flat_map(|line| line.split_whitespace()).collect();
    params.bitrate = number_after(&rest, "bitrate")?;
    params.sample_point = number_after(&rest, "sample-point")?;
    params.tq = number_after(&rest, "tq")?;
    params.prop_seg = number_after(&rest, "prop-seg")?;
    params.phase_seg1 = number_after(&rest, "phase-seg1")?;
    params.phase_seg2 = number_after(&rest, "phase-seg2")?;
    params.sjw = number_after(&rest, "sjw")?;
    Ok(params)
}

fn value_after<'a>(tokens: &[&'a str], key: &str) -> Option<&'a str> {
    tokens.iter().position(|token| *token == key).and_then(|at| tokens.get(at + 1)).copied()
}

fn number_after<T: std::str::FromStr>(tokens: &[&str], key: &str) -> Result<T> {
    let text = value_after(tokens, key)
        .ok_or_else(|| BusError::parse_error("bus parameters", format!("missing {key}")))?;
    text.parse()
        .map_err(|_| BusError::parse_error("bus parameters", format!("{key} value '{text}' is not a number")))
}

async fn run_ip(args: &[&str]) -> Result<String> {
    let output = Command::new("ip").args(args).output().await?;
    if !output.status.success() {
        return Err(BusError::parse_error(
            format!("ip {}", args.join(" ")),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// List `can` and `vcan` links.
pub async fn list_interfaces() -> Result<InterfaceList> {
    let can = parse_interface_names(&run_ip(&["link", "show", "type", "can"]).await?);
    let vcan = parse_interface_names(&run_ip(&["link", "show", "type", "vcan"]).await?);
    info!(?can, ?vcan, "Discovered interfaces");
    Ok(InterfaceList { can, vcan })
}

/// Fail unless `interface` is a known CAN link that is administratively up.
pub async fn ensure_up(interface: &str, interfaces: &InterfaceList) -> Result<()> {
    if !interfaces.contains(interface) {
        return Err(BusError::InterfaceNotFound { interface: interface.to_string() });
    }
    let flags = parse_link_flags(&run_ip(&["link", "show", interface]).await?);
    debug!(interface, ?flags, "Link flags");
    if !flags.iter().any(|flag| flag == "UP") {
        return Err(BusError::InterfaceDown { interface: interface.to_string() });
    }
    Ok(())
}

/// Read bit timing for `interface`.
///
/// Virtual interfaces, and any readout failure, yield zeroed parameters.
pub async fn read_parameters(interface: &str, interfaces: &InterfaceList) -> BusParameters {
    if !interfaces.is_physical(interface) {
        return BusParameters::default();
    }
    let output = run_ip(&["-details", "link", "show", interface]).await;
    output.and_then(|text| parse_parameters(&text)).unwrap_or_else(|e| {
        warn!(interface, "Could not read bus parameters: {}", e);
        BusParameters::default()
    })
}
