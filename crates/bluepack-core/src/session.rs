//! An established session: the connected stream and who is on the other end

use std::fmt;

use tokio::io::{ReadHalf, WriteHalf};

use crate::radio::BoxedStream;
use crate::types::{PeerAddress, SessionOrigin};

/// Connected socket split into its input and output halves
///
/// Dropping both halves closes the underlying socket.
pub struct Session {
    peer: PeerAddress,
    origin: SessionOrigin,
    reader: ReadHalf<BoxedStream>,
    writer: WriteHalf<BoxedStream>,
}

impl Session {
    pub fn new(stream: BoxedStream, peer: PeerAddress, origin: SessionOrigin) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            peer,
            origin,
            reader,
            writer,
        }
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub(crate) fn into_parts(self) -> (ReadHalf<BoxedStream>, WriteHalf<BoxedStream>) {
        (self.reader, self.writer)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}
