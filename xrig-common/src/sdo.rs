//! Wire format for expedited SDO transfers
//!
//! The drive controllers only ever exchange values of up to 4 bytes, so only the expedited
//! (single frame) variants of the SDO protocol are implemented. A request or response is always
//! carried in one frame:
//!
//! | byte | content |
//! |------|---------|
//! | 0 | command specifier |
//! | 1-2 | object index, little endian |
//! | 3 | sub index |
//! | 4-7 | payload, little endian, zero filled |
use int_enum::IntEnum;
use snafu::Snafu;

use crate::constants::ObjectRef;

const CCS_DOWNLOAD: u8 = 1 << 5;
const CCS_UPLOAD: u8 = 2 << 5;
const SCS_UPLOAD: u8 = 2 << 5;
const SCS_DOWNLOAD: u8 = 3 << 5;
const CS_ABORT: u8 = 4 << 5;

const FLAG_EXPEDITED: u8 = 0x02;
const FLAG_SIZE: u8 = 0x01;

/// Abort codes defined by CiA-301
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntEnum)]
#[repr(u32)]
pub enum AbortCode {
    /// Toggle bit not alternated
    ToggleNotAlternated = 0x0503_0000,
    /// SDO protocol timed out
    SdoTimeout = 0x0504_0000,
    /// Client/server command specifier not valid or unknown
    InvalidCommandSpecifier = 0x0504_0001,
    /// Invalid block size
    InvalidBlockSize = 0x0504_0002,
    /// Invalid sequence number
    InvalidSequenceNumber = 0x0504_0003,
    /// CRC error
    CrcError = 0x0504_0004,
    /// Out of memory
    OutOfMemory = 0x0504_0005,
    /// Unsupported access to an object
    UnsupportedAccess = 0x0601_0000,
    /// Attempt to read a write only object
    WriteOnly = 0x0601_0001,
    /// Attempt to write a read only object
    ReadOnly = 0x0601_0002,
    /// Object does not exist in the object dictionary
    NoSuchObject = 0x0602_0000,
    /// Object cannot be mapped to the PDO
    UnallowedPdo = 0x0604_0041,
    /// The number and length of objects would exceed PDO length
    PdoTooLong = 0x0604_0042,
    /// General parameter incompatibility
    IncompatibleParameter = 0x0604_0043,
    /// General internal incompatibility in the device
    InternalIncompatibility = 0x0604_0047,
    /// Access failed due to a hardware error
    HardwareError = 0x0606_0000,
    /// Data type does not match, length of service parameter does not match
    DataTypeMismatch = 0x0607_0010,
    /// Data type does not match, length of service parameter too high
    DataTypeMismatchLengthHigh = 0x0607_0012,
    /// Data type does not match, length of service parameter too low
    DataTypeMismatchLengthLow = 0x0607_0013,
    /// Sub-index does not exist
    NoSuchSubIndex = 0x0609_0011,
    /// Invalid value for parameter (download only)
    InvalidValue = 0x0609_0030,
    /// Value of parameter written too high
    ValueTooHigh = 0x0609_0031,
    /// Value of parameter written too low
    ValueTooLow = 0x0609_0032,
    /// Maximum value is less than minimum value
    MaxLessThanMin = 0x0609_0036,
    /// Resource not available
    ResourceNotAvailable = 0x060A_0023,
    /// General error
    GeneralError = 0x0800_0000,
    /// Data cannot be transferred or stored to the application
    CantStore = 0x0800_0020,
    /// Data cannot be transferred because of local control
    CantStoreLocalControl = 0x0800_0021,
    /// Data cannot be transferred because of the present device state
    CantStoreDeviceState = 0x0800_0022,
    /// No object dictionary is present
    NoObjectDict = 0x0800_0023,
    /// No data available
    NoData = 0x0800_0024,
}

/// A wrapper around the AbortCode enum to allow for unknown values
///
/// Drives are free to use vendor specific abort codes, and this allows those to be captured and
/// exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawAbortCode {
    /// A recognized abort code
    Valid(AbortCode),
    /// An unrecognized abort code
    Unknown(u32),
}

impl RawAbortCode {
    /// Get the raw u32 value of the code
    pub fn raw(&self) -> u32 {
        match self {
            RawAbortCode::Valid(code) => u32::from(*code),
            RawAbortCode::Unknown(code) => *code,
        }
    }
}

impl core::fmt::Display for RawAbortCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RawAbortCode::Valid(abort_code) => write!(f, "{abort_code:?}"),
            RawAbortCode::Unknown(code) => write!(f, "{code:08X}"),
        }
    }
}

impl From<u32> for RawAbortCode {
    fn from(value: u32) -> Self {
        match AbortCode::try_from(value) {
            Ok(code) => Self::Valid(code),
            Err(_) => Self::Unknown(value),
        }
    }
}

impl From<AbortCode> for RawAbortCode {
    fn from(value: AbortCode) -> Self {
        Self::Valid(value)
    }
}

/// A request sent from the client to a node's SDO server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdoRequest {
    /// Read an object
    Upload {
        /// The object to read
        object: ObjectRef,
    },
    /// Write up to 4 bytes to an object
    Download {
        /// The object to write
        object: ObjectRef,
        /// Number of valid bytes in `data` (1-4)
        len: u8,
        /// Payload, little endian
        data: [u8; 4],
    },
    /// Abort a transfer
    Abort {
        /// The object whose transfer is aborted
        object: ObjectRef,
        /// The reason
        abort_code: u32,
    },
}

impl SdoRequest {
    /// Create a read request
    pub fn upload(object: ObjectRef) -> Self {
        Self::Upload { object }
    }

    /// Create an expedited write request
    ///
    /// Panics if data is empty or longer than 4 bytes
    pub fn expedited_download(object: ObjectRef, data: &[u8]) -> Self {
        assert!(!data.is_empty() && data.len() <= 4);
        let mut buf = [0; 4];
        buf[..data.len()].copy_from_slice(data);
        Self::Download {
            object,
            len: data.len() as u8,
            data: buf,
        }
    }

    /// The object addressed by this request
    pub fn object(&self) -> ObjectRef {
        match self {
            SdoRequest::Upload { object }
            | SdoRequest::Download { object, .. }
            | SdoRequest::Abort { object, .. } => *object,
        }
    }

    /// Serialize the request into frame data
    pub fn to_bytes(&self) -> [u8; 8] {
        let (cmd, object, payload) = match *self {
            SdoRequest::Upload { object } => (CCS_UPLOAD, object, [0; 4]),
            SdoRequest::Download { object, len, data } => {
                let n = 4 - len;
                (
                    CCS_DOWNLOAD | (n << 2) | FLAG_EXPEDITED | FLAG_SIZE,
                    object,
                    data,
                )
            }
            SdoRequest::Abort { object, abort_code } => {
                (CS_ABORT, object, abort_code.to_le_bytes())
            }
        };
        let index = object.index.to_le_bytes();
        [
            cmd, index[0], index[1], object.sub, payload[0], payload[1], payload[2], payload[3],
        ]
    }
}

/// Error returned when frame data cannot be parsed as an SDO message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Snafu)]
pub enum SdoParseError {
    /// The frame is too short to contain an SDO header
    #[snafu(display("SDO frame too short ({len} bytes)"))]
    TooShort {
        /// Number of bytes received
        len: usize,
    },
    /// The command specifier is not one a server may send
    #[snafu(display("Unsupported SDO command byte 0x{cmd:02X}"))]
    UnsupportedCommand {
        /// The offending command byte
        cmd: u8,
    },
}

/// A response sent from a node's SDO server to the client
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SdoResponse {
    /// Response to an upload request
    ConfirmUpload {
        /// The object which was read
        object: ObjectRef,
        /// True if the value is carried in this frame
        expedited: bool,
        /// Number of valid payload bytes
        len: usize,
        /// Payload, little endian, zero filled
        data: [u8; 4],
    },
    /// Response to an expedited download
    ConfirmDownload {
        /// The object which was written
        object: ObjectRef,
    },
    /// The server rejected the transfer
    Abort {
        /// The object which was accessed
        object: ObjectRef,
        /// The reason
        abort_code: u32,
    },
}

impl SdoResponse {
    /// Build an expedited upload confirmation
    ///
    /// Panics if data is empty or longer than 4 bytes
    pub fn expedited_upload(object: ObjectRef, data: &[u8]) -> Self {
        assert!(!data.is_empty() && data.len() <= 4);
        let mut buf = [0; 4];
        buf[..data.len()].copy_from_slice(data);
        Self::ConfirmUpload {
            object,
            expedited: true,
            len: data.len(),
            data: buf,
        }
    }

    /// Build a download confirmation
    pub fn download_acknowledge(object: ObjectRef) -> Self {
        Self::ConfirmDownload { object }
    }

    /// Build an abort response
    pub fn abort(object: ObjectRef, abort_code: AbortCode) -> Self {
        Self::Abort {
            object,
            abort_code: abort_code.into(),
        }
    }

    /// The object echoed by the response
    pub fn object(&self) -> ObjectRef {
        match self {
            SdoResponse::ConfirmUpload { object, .. }
            | SdoResponse::ConfirmDownload { object }
            | SdoResponse::Abort { object, .. } => *object,
        }
    }

    /// Serialize the response into frame data
    pub fn to_bytes(&self) -> [u8; 8] {
        let (cmd, object, payload) = match *self {
            SdoResponse::ConfirmUpload {
                object,
                expedited,
                len,
                data,
            } => {
                let cmd = if expedited {
                    SCS_UPLOAD | (((4 - len as u8) & 0x3) << 2) | FLAG_EXPEDITED | FLAG_SIZE
                } else {
                    SCS_UPLOAD | FLAG_SIZE
                };
                (cmd, object, data)
            }
            SdoResponse::ConfirmDownload { object } => (SCS_DOWNLOAD, object, [0; 4]),
            SdoResponse::Abort { object, abort_code } => {
                (CS_ABORT, object, abort_code.to_le_bytes())
            }
        };
        let index = object.index.to_le_bytes();
        [
            cmd, index[0], index[1], object.sub, payload[0], payload[1], payload[2], payload[3],
        ]
    }

    /// The payload of an upload confirmation as an unsigned value
    ///
    /// Returns None for other response types.
    pub fn value(&self) -> Option<u32> {
        match self {
            SdoResponse::ConfirmUpload { len, data, .. } => {
                let mut buf = [0; 4];
                buf[..*len].copy_from_slice(&data[..*len]);
                Some(u32::from_le_bytes(buf))
            }
            _ => None,
        }
    }
}

impl TryFrom<&[u8]> for SdoResponse {
    type Error = SdoParseError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < 4 {
            return TooShortSnafu { len: bytes.len() }.fail();
        }
        let cmd = bytes[0];
        let object = ObjectRef::new(u16::from_le_bytes([bytes[1], bytes[2]]), bytes[3]);
        // Some drives shorten the frame to the size of the value instead of padding to 8 bytes
        let mut payload = [0; 4];
        let avail = (bytes.len() - 4).min(4);
        payload[..avail].copy_from_slice(&bytes[4..4 + avail]);

        match cmd & 0xE0 {
            SCS_UPLOAD => {
                let expedited = cmd & FLAG_EXPEDITED != 0;
                let len = if cmd & FLAG_SIZE != 0 && expedited {
                    4 - ((cmd >> 2) & 0x3) as usize
                } else if avail > 0 {
                    avail
                } else {
                    4
                };
                Ok(SdoResponse::ConfirmUpload {
                    object,
                    expedited,
                    len,
                    data: payload,
                })
            }
            SCS_DOWNLOAD => Ok(SdoResponse::ConfirmDownload { object }),
            CS_ABORT => Ok(SdoResponse::Abort {
                object,
                abort_code: u32::from_le_bytes(payload),
            }),
            _ => UnsupportedCommandSnafu { cmd }.fail(),
        }
    }
}

impl TryFrom<&[u8]> for SdoRequest {
    type Error = SdoParseError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < 8 {
            return TooShortSnafu { len: bytes.len() }.fail();
        }
        let cmd = bytes[0];
        let object = ObjectRef::new(u16::from_le_bytes([bytes[1], bytes[2]]), bytes[3]);
        let mut data = [0; 4];
        data.copy_from_slice(&bytes[4..8]);
        match cmd & 0xE0 {
            CCS_UPLOAD => Ok(SdoRequest::Upload { object }),
            CCS_DOWNLOAD if cmd & FLAG_EXPEDITED != 0 => {
                let len = if cmd & FLAG_SIZE != 0 {
                    4 - ((cmd >> 2) & 0x3)
                } else {
                    4
                };
                Ok(SdoRequest::Download { object, len, data })
            }
            CS_ABORT => Ok(SdoRequest::Abort {
                object,
                abort_code: u32::from_le_bytes(data),
            }),
            _ => UnsupportedCommandSnafu { cmd }.fail(),
        }
    }
}

/// Reinterpret a raw 32-bit payload as a two's complement signed value
///
/// Used for position objects; status and control words are never sign converted.
pub fn decode_i32(raw: u32) -> i32 {
    raw as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::objects;

    #[test]
    fn test_read_request_bytes() {
        let req = SdoRequest::upload(objects::STATUS_WORD);
        assert_eq!([0x40, 0x41, 0x60, 0x00, 0, 0, 0, 0], req.to_bytes());
    }

    #[test]
    fn test_write_request_bytes() {
        let req = SdoRequest::expedited_download(
            objects::TARGET_POSITION,
            &(-2i32).to_le_bytes(),
        );
        assert_eq!(
            [0x23, 0x7A, 0x60, 0x00, 0xFE, 0xFF, 0xFF, 0xFF],
            req.to_bytes()
        );

        let req = SdoRequest::expedited_download(objects::CONTROL_WORD, &0x86u16.to_le_bytes());
        assert_eq!([0x2B, 0x40, 0x60, 0x00, 0x86, 0, 0, 0], req.to_bytes());
        assert_eq!(Ok(req), SdoRequest::try_from(&req.to_bytes()[..]));
    }

    #[test]
    fn test_parse_upload_sizes() {
        let resp = SdoResponse::try_from(&[0x4B, 0x41, 0x60, 0x00, 0x37, 0x06, 0xAA, 0xBB][..])
            .unwrap();
        assert_eq!(objects::STATUS_WORD, resp.object());
        assert_eq!(Some(0x0637), resp.value());

        // Size not indicated, value length taken from the frame length
        let resp = SdoResponse::try_from(&[0x42, 0x41, 0x60, 0x00, 0x37, 0x06][..]).unwrap();
        assert_eq!(Some(0x0637), resp.value());
    }

    #[test]
    fn test_signed_decode() {
        let decode = |raw: u32| {
            let resp = SdoResponse::try_from(
                &SdoResponse::expedited_upload(objects::ACTUAL_POSITION, &raw.to_le_bytes())
                    .to_bytes()[..],
            )
            .unwrap();
            decode_i32(resp.value().unwrap())
        };
        assert_eq!(-1, decode(0xFFFF_FFFF));
        assert_eq!(2147483647, decode(0x7FFF_FFFF));
        assert_eq!(-2147483648, decode(0x8000_0000));
    }

    #[test]
    fn test_parse_abort() {
        let bytes = SdoResponse::abort(objects::TARGET_POSITION, AbortCode::ValueTooHigh).to_bytes();
        assert_eq!(0x80, bytes[0]);
        let resp = SdoResponse::try_from(&bytes[..]).unwrap();
        match resp {
            SdoResponse::Abort { object, abort_code } => {
                assert_eq!(objects::TARGET_POSITION, object);
                assert_eq!(
                    RawAbortCode::Valid(AbortCode::ValueTooHigh),
                    RawAbortCode::from(abort_code)
                );
            }
            _ => panic!("Expected abort, got {resp:?}"),
        }
        assert_eq!(RawAbortCode::Unknown(0x1234), RawAbortCode::from(0x1234));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Err(SdoParseError::TooShort { len: 2 }),
            SdoResponse::try_from(&[0x43, 0x41][..])
        );
        assert_eq!(
            Err(SdoParseError::UnsupportedCommand { cmd: 0x20 }),
            SdoResponse::try_from(&[0x20, 0x41, 0x60, 0, 0, 0, 0, 0][..])
        );
    }
}
