//! A receive-timeout combinator applied to every socket read/write and
//! to the initial connect/TLS handshake (spec §4.1, §5 "Suspension points").

use std::future::Future;
use std::time::Duration;
use tokio::time::Timeout;

pub trait WithTimeout {
    fn with_timeout(self, duration: Duration) -> Timeout<Self>
    where
        Self: Sized;
}

impl<T> WithTimeout for T
where
    T: Future + Sized,
{
    fn with_timeout(self, duration: Duration) -> Timeout<Self> {
        tokio::time::timeout(duration, self)
    }
}
