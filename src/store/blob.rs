//! Blob type - the on-disk record of one tree node

use crate::model::Node;
use crate::{Error, Result};

/// Type tag for blobs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobType {
    Leaf,
    Internal,
}

impl BlobType {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobType::Leaf => 1,
            BlobType::Internal => 2,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(BlobType::Leaf),
            2 => Some(BlobType::Internal),
            _ => None,
        }
    }
}

/// A typed chunk of encoded node data
#[derive(Clone, Debug)]
pub struct Blob {
    pub blob_type: BlobType,
    /// bincode-encoded [`Node`], uncompressed
    pub data: Vec<u8>,
}

impl Blob {
    pub fn from_node(node: &Node) -> Result<Self> {
        let blob_type = if node.is_leaf() {
            BlobType::Leaf
        } else {
            BlobType::Internal
        };
        Ok(Blob {
            blob_type,
            data: node.encode()?,
        })
    }

    /// Decode the node, checking it agrees with the type tag
    pub fn to_node(&self) -> Result<Node> {
        let node = Node::decode(&self.data)?;
        if node.is_leaf() != (self.blob_type == BlobType::Leaf) {
            return Err(Error::StorageCorruption(format!(
                "blob tagged {:?} holds a different node kind",
                self.blob_type
            )));
        }
        Ok(node)
    }

    /// Type byte followed by the zstd-compressed data
    pub fn compress(&self, level: i32) -> Result<Vec<u8>> {
        let mut output = vec![self.blob_type.as_byte()];
        output.extend(zstd::encode_all(self.data.as_slice(), level)?);
        Ok(output)
    }

    pub fn decompress(data: &[u8]) -> Result<Self> {
        let (&tag, payload) = data
            .split_first()
            .ok_or_else(|| Error::StorageCorruption("empty blob".into()))?;
        let blob_type = BlobType::from_byte(tag)
            .ok_or_else(|| Error::StorageCorruption(format!("invalid blob type: {}", tag)))?;
        Ok(Blob {
            blob_type,
            data: zstd::decode_all(payload)?,
        })
    }
}
