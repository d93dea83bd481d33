// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Error Classification
//!
//! Administrative operations need to tell a missing resource apart from every other
//! broker failure. All knowledge about how lapin reports broker replies is kept here.

use lapin::protocol::{AMQPErrorKind, AMQPSoftError};

/// Reply code the broker uses for a missing exchange or queue
pub const AMQP_REPLY_NOT_FOUND: u16 = 404;

/// Closed classification of broker failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerErrorKind {
    NotFound,
    Other,
}

/// Classifies a lapin error.
pub fn classify(err: &lapin::Error) -> BrokerErrorKind {
    match err {
        lapin::Error::ProtocolError(amqp) => match amqp.kind() {
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => BrokerErrorKind::NotFound,
            _ => classify_reply_code(amqp.get_id()),
        },
        _ => BrokerErrorKind::Other,
    }
}

/// Classifies a raw AMQP reply code.
pub fn classify_reply_code(code: u16) -> BrokerErrorKind {
    if code == AMQP_REPLY_NOT_FOUND {
        BrokerErrorKind::NotFound
    } else {
        BrokerErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::{
        protocol::{AMQPError, AMQPHardError},
        types::ShortString,
    };

    fn protocol_error(kind: AMQPErrorKind) -> lapin::Error {
        lapin::Error::ProtocolError(AMQPError::new(kind, ShortString::from("broker reply")))
    }

    #[test]
    fn test_not_found_reply() {
        let err = protocol_error(AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND));
        assert_eq!(classify(&err), BrokerErrorKind::NotFound);
    }

    #[test]
    fn test_other_soft_reply() {
        let err = protocol_error(AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED));
        assert_eq!(classify(&err), BrokerErrorKind::Other);
    }

    #[test]
    fn test_hard_reply() {
        let err = protocol_error(AMQPErrorKind::Hard(AMQPHardError::CONNECTIONFORCED));
        assert_eq!(classify(&err), BrokerErrorKind::Other);
    }

    #[test]
    fn test_non_protocol_error() {
        assert_eq!(
            classify(&lapin::Error::ChannelsLimitReached),
            BrokerErrorKind::Other
        );
    }

    #[test]
    fn test_reply_codes() {
        assert_eq!(classify_reply_code(404), BrokerErrorKind::NotFound);
        assert_eq!(classify_reply_code(403), BrokerErrorKind::Other);
        assert_eq!(classify_reply_code(200), BrokerErrorKind::Other);
    }
}
