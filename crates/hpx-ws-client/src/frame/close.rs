/// Status code carried in the first two bytes of a close frame (RFC 6455 §7.4).
#[derive(Debug, Eq, PartialEq, Clone, Copy, Hash)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the endpoint is going away.
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003: received a type of data the endpoint cannot accept.
    UnsupportedData,
    /// 1005: no status code was present. Never sent on the wire.
    NoStatus,
    /// 1006: dropped without a close frame. Never sent on the wire.
    Abnormal,
    /// 1007: message data inconsistent with its type.
    InvalidPayload,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1010: the server did not negotiate an extension the client requires.
    MandatoryExtension,
    /// 1011
    InternalError,
    /// 1012
    ServiceRestart,
    /// 1013
    TryAgainLater,
    /// 1014: a gateway received an invalid response from upstream.
    BadGateway,
    /// 1015: TLS handshake failure. Never sent on the wire.
    TlsHandshake,
    /// Any other code.
    Other(u16),
}

const KNOWN: [(u16, CloseCode); 15] = [
    (1000, CloseCode::Normal),
    (1001, CloseCode::GoingAway),
    (1002, CloseCode::ProtocolError),
    (1003, CloseCode::UnsupportedData),
    (1005, CloseCode::NoStatus),
    (1006, CloseCode::Abnormal),
    (1007, CloseCode::InvalidPayload),
    (1008, CloseCode::PolicyViolation),
    (1009, CloseCode::MessageTooBig),
    (1010, CloseCode::MandatoryExtension),
    (1011, CloseCode::InternalError),
    (1012, CloseCode::ServiceRestart),
    (1013, CloseCode::TryAgainLater),
    (1014, CloseCode::BadGateway),
    (1015, CloseCode::TlsHandshake),
];

impl CloseCode {
    /// Whether this code may appear in a close frame on the wire: the
    /// defined codes except 1005, 1006 and 1015, plus the registered
    /// (3000-3999) and private (4000-4999) ranges.
    pub fn is_allowed(self) -> bool {
        match self {
            Self::NoStatus | Self::Abnormal | Self::TlsHandshake => false,
            Self::Other(code) => (3000..5000).contains(&code),
            _ => true,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        KNOWN
            .iter()
            .find(|(known, _)| *known == code)
            .map_or(Self::Other(code), |(_, close)| *close)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Other(code) => code,
            known => KNOWN
                .iter()
                .find(|(_, close)| *close == known)
                .map_or(1000, |(code, _)| *code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_both_ways() {
        for (code, close) in KNOWN {
            assert_eq!(CloseCode::from(code), close);
            assert_eq!(u16::from(close), code);
        }
        assert_eq!(u16::from(CloseCode::from(4001)), 4001);
    }

    #[test]
    fn reserved_codes_are_not_allowed() {
        assert!(CloseCode::Normal.is_allowed());
        assert!(!CloseCode::from(1005).is_allowed());
        assert!(!CloseCode::from(1006).is_allowed());
        assert!(!CloseCode::from(1015).is_allowed());
        assert!(!CloseCode::from(999).is_allowed());
        assert!(!CloseCode::from(1004).is_allowed());
        assert!(CloseCode::from(1014).is_allowed());
        assert!(!CloseCode::from(2000).is_allowed());
        assert!(CloseCode::from(3000).is_allowed());
        assert!(CloseCode::from(4999).is_allowed());
        assert!(!CloseCode::from(5000).is_allowed());
    }
}
