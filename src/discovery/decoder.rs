//! Beacon payload decoding
//!
//! A beacon datagram holds one varint length prefix followed by a record in
//! protobuf wire format. Field numbers:
//!
//! | Field | Wire      | Content                                        |
//! |-------|-----------|------------------------------------------------|
//! | 1     | varint    | serial number                                  |
//! | 2     | varint    | system type                                    |
//! | 3     | len       | software version {1 major, 2 minor, 3 build}   |
//! | 4     | varint    | connection availability (0 available, 1 busy)  |
//! | 5     | fixed32   | CPU temperature, f32                           |
//! | 6     | len       | Explorer flags (no fields)                     |
//! | 7     | len       | Voyager flags (no fields)                      |
//! | 8     | len       | Defender flags {1 recording, 2 storage %}      |
//!
//! Zero-valued scalars may be omitted by the sender and decode as zero. The
//! serial number and a variant field are required. When more than one
//! variant field is present the last one wins. Unknown fields are skipped.

use prost::Message;
use std::net::SocketAddr;
use tokio::time::Instant;

use crate::types::{Beacon, BeaconVariant, ConnectionAvailability, SoftwareVersion, SystemType};
use crate::{Result, SonarError};

const CONTEXT: &str = "Beacon";

/// Beacon record as it appears on the wire.
#[derive(Clone, PartialEq, Message)]
pub struct BeaconRecord {
    #[prost(uint32, optional, tag = "1")]
    pub serial_number: Option<u32>,
    #[prost(uint32, tag = "2")]
    pub system_type: u32,
    #[prost(message, optional, tag = "3")]
    pub software_version: Option<SoftwareVersionRecord>,
    #[prost(uint32, tag = "4")]
    pub connection_availability: u32,
    #[prost(float, tag = "5")]
    pub cpu_temp: f32,
    #[prost(oneof = "VariantRecord", tags = "6, 7, 8")]
    pub variant: Option<VariantRecord>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SoftwareVersionRecord {
    #[prost(uint32, tag = "1")]
    pub major: u32,
    #[prost(uint32, tag = "2")]
    pub minor: u32,
    #[prost(uint32, tag = "3")]
    pub build: u32,
}

/// Explorer and Voyager beacons carry an empty flags record.
#[derive(Clone, PartialEq, Message)]
pub struct EmptyFlags {}

#[derive(Clone, PartialEq, Message)]
pub struct DefenderFlags {
    #[prost(bool, tag = "1")]
    pub recording: bool,
    #[prost(uint32, tag = "2")]
    pub storage_percent_full: u32,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum VariantRecord {
    #[prost(message, tag = "6")]
    Explorer(EmptyFlags),
    #[prost(message, tag = "7")]
    Voyager(EmptyFlags),
    #[prost(message, tag = "8")]
    Defender(DefenderFlags),
}

/// Decode a beacon datagram received from `source` at `received_at`.
pub fn decode_beacon(payload: &[u8], source: SocketAddr, received_at: Instant) -> Result<Beacon> {
    let record = BeaconRecord::decode_length_delimited(payload)
        .map_err(|e| SonarError::parse_error(CONTEXT, e.to_string()))?;

    let serial_number = record
        .serial_number
        .ok_or_else(|| SonarError::parse_error(CONTEXT, "missing serial number"))?;
    let variant = match record.variant {
        Some(VariantRecord::Explorer(_)) => BeaconVariant::Explorer,
        Some(VariantRecord::Voyager(_)) => BeaconVariant::Voyager,
        Some(VariantRecord::Defender(flags)) => BeaconVariant::Defender {
            recording: flags.recording,
            storage_percent_full: flags.storage_percent_full,
        },
        None => return Err(SonarError::parse_error(CONTEXT, "missing device variant")),
    };
    let software_version = record
        .software_version
        .map(|v| SoftwareVersion { major: v.major, minor: v.minor, build: v.build })
        .unwrap_or_default();

    Ok(Beacon {
        received_at,
        source,
        system_type: SystemType::from_code(record.system_type),
        serial_number,
        software_version,
        connection_availability: ConnectionAvailability::from_code(record.connection_availability),
        cpu_temp: record.cpu_temp,
        variant,
    })
}

/// Encode a beacon the way the device does. Receive metadata is not encoded.
pub fn encode_beacon(beacon: &Beacon) -> Vec<u8> {
    let version = beacon.software_version;
    let variant = match beacon.variant {
        BeaconVariant::Explorer => VariantRecord::Explorer(EmptyFlags {}),
        BeaconVariant::Voyager => VariantRecord::Voyager(EmptyFlags {}),
        BeaconVariant::Defender { recording, storage_percent_full } => {
            VariantRecord::Defender(DefenderFlags { recording, storage_percent_full })
        }
    };
    BeaconRecord {
        serial_number: Some(beacon.serial_number),
        system_type: beacon.system_type.code(),
        software_version: Some(SoftwareVersionRecord {
            major: version.major,
            minor: version.minor,
            build: version.build,
        }),
        connection_availability: beacon.connection_availability.code(),
        cpu_temp: beacon.cpu_temp,
        variant: Some(variant),
    }
    .encode_length_delimited_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::beacon;

    fn source() -> SocketAddr {
        ([192, 168, 1, 24], 56124).into()
    }

    #[test]
    fn decodes_each_variant() {
        let variants = [
            BeaconVariant::Explorer,
            BeaconVariant::Voyager,
            BeaconVariant::Defender { recording: true, storage_percent_full: 63 },
        ];
        for variant in variants {
            let mut original = beacon(1234, source());
            original.variant = variant;
            original.system_type = SystemType::Aris3000;
            original.connection_availability = ConnectionAvailability::Busy;

            let decoded =
                decode_beacon(&encode_beacon(&original), source(), original.received_at).unwrap();
            assert_eq!(decoded, original);
        }
    }

    #[test]
    fn omitted_zero_fields_decode_as_zero() {
        // serial 24 then explorer flags only
        let record = [0x08, 24, 0x32, 0x00];
        let mut payload = vec![record.len() as u8];
        payload.extend_from_slice(&record);

        let decoded = decode_beacon(&payload, source(), Instant::now()).unwrap();
        assert_eq!(decoded.serial_number, 24);
        assert_eq!(decoded.system_type, SystemType::Aris1800);
        assert_eq!(decoded.software_version, SoftwareVersion::default());
        assert!(decoded.is_available());
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut record = vec![0x08, 24];
        // field 15, fixed64
        record.push((15 << 3) | 1);
        record.extend_from_slice(&[0; 8]);
        // field 16, length-delimited, three bytes
        record.extend_from_slice(&[0x82, 0x01, 3, 1, 2, 3]);
        record.extend_from_slice(&[0x3A, 0x00]);
        let mut payload = vec![record.len() as u8];
        payload.extend_from_slice(&record);

        let decoded = decode_beacon(&payload, source(), Instant::now()).unwrap();
        assert_eq!(decoded.variant, BeaconVariant::Voyager);
    }

    #[test]
    fn missing_serial_number_is_rejected() {
        let payload = [2, 0x32, 0x00];
        assert!(decode_beacon(&payload, source(), Instant::now()).is_err());
    }

    #[test]
    fn missing_variant_is_rejected() {
        let payload = [2, 0x08, 24];
        assert!(decode_beacon(&payload, source(), Instant::now()).is_err());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let full = encode_beacon(&beacon(99, source()));
        for cut in 0..full.len() {
            assert!(
                decode_beacon(&full[..cut], source(), Instant::now()).is_err(),
                "prefix of {} bytes decoded",
                cut
            );
        }
    }

    #[test]
    fn wrong_wire_type_for_known_field_is_rejected() {
        // serial number encoded as fixed32
        let record = [0x0D, 1, 0, 0, 0, 0x32, 0x00];
        let mut payload = vec![record.len() as u8];
        payload.extend_from_slice(&record);
        assert!(decode_beacon(&payload, source(), Instant::now()).is_err());
    }

    #[test]
    fn last_variant_field_wins() {
        // serial 24, explorer flags, then defender flags {recording}
        let record = [0x08, 24, 0x32, 0x00, 0x42, 0x02, 0x08, 0x01];
        let mut payload = vec![record.len() as u8];
        payload.extend_from_slice(&record);

        let decoded = decode_beacon(&payload, source(), Instant::now()).unwrap();
        assert_eq!(
            decoded.variant,
            BeaconVariant::Defender { recording: true, storage_percent_full: 0 }
        );
    }

    #[test]
    fn decode_failures_are_parse_errors() {
        let err = decode_beacon(&[5, 0x08], source(), Instant::now()).unwrap_err();
        assert!(matches!(err, SonarError::Parse { .. }), "got {:?}", err);
    }

    #[test]
    fn large_serial_numbers_use_multibyte_varints() {
        let original = beacon(3_000_000_000, source());
        let decoded =
            decode_beacon(&encode_beacon(&original), source(), original.received_at).unwrap();
        assert_eq!(decoded.serial_number, 3_000_000_000);
    }
}
