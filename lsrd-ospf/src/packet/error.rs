//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub type DecodeResult<T> = Result<T, DecodeError>;

// Reasons a received packet is dropped as a whole.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    InvalidIpHdrLength(u16),
    InvalidVersion(u8),
    UnknownPacketType(u8),
    InvalidLength(u16),
    InvalidChecksum,
    InvalidRouterId(Ipv4Addr),
    UnsupportedAuthType(u16),
    // An LSA header claims more (or fewer) bytes than are available.
    InvalidLsaLength,
}

// Reasons a single decoded LSA is discarded from an LS Update. The rest of
// the packet is still processed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaValidationError {
    InvalidChecksum,
    InvalidLsaAge,
    InvalidLsaSeqNo,
    RouterLsaIdMismatch,
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidIpHdrLength(len) => {
                write!(f, "bad IP header length {len}")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "not OSPFv2 (version {version})")
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "packet type {pkt_type} unknown")
            }
            DecodeError::InvalidLength(len) => {
                write!(f, "bad packet length {len}")
            }
            DecodeError::InvalidChecksum => f.write_str("checksum mismatch"),
            DecodeError::InvalidRouterId(router_id) => {
                write!(f, "router-id {router_id} not usable")
            }
            DecodeError::UnsupportedAuthType(au_type) => {
                write!(f, "AuType {au_type} not supported")
            }
            DecodeError::InvalidLsaLength => f.write_str("LSA framing broken"),
        }
    }
}

impl std::error::Error for DecodeError {}

// ===== impl LsaValidationError =====

impl std::fmt::Display for LsaValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LsaValidationError::InvalidChecksum => "LSA checksum mismatch",
            LsaValidationError::InvalidLsaAge => "LS age above MaxAge",
            LsaValidationError::InvalidLsaSeqNo => "reserved sequence number",
            LsaValidationError::RouterLsaIdMismatch => {
                "router-LSA ID differs from advertising router"
            }
        })
    }
}

impl std::error::Error for LsaValidationError {}
