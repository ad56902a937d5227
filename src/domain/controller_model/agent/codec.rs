use bytes::BytesMut;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::marker::PhantomData;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Combines LengthDelimitedCodec (TCP framing) with Bincode (Serialization) for one frame type.
pub struct AgentCodec<T> {
    codec: LengthDelimitedCodec,
    frame: PhantomData<fn() -> T>,
}

impl<T> AgentCodec<T> {
    pub fn new() -> Self {
        Self { codec: LengthDelimitedCodec::new(), frame: PhantomData }
    }
}

impl<T> Default for AgentCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Encoder<T> for AgentCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.codec.encode(bytes::Bytes::from(bytes), dst)
    }
}

impl<T: DeserializeOwned> Decoder for AgentCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.codec.decode(src)? {
            Some(bytes) => {
                let item = bincode::deserialize(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}
