use std::collections::{BTreeMap, HashMap};

use prost::Message;

use crate::proto;
use crate::state::CUSTOM_NAME_KEY;
use crate::{Digest, Error};

/// A marshalled build graph, as produced by [crate::State::marshal] or
/// received over the wire.
///
/// Ops are kept in dependency order: every input of an op appears before it.
#[derive(Clone, Debug, PartialEq)]
pub struct Definition {
    ops: Vec<(Digest, proto::Op)>,
    index: HashMap<Digest, usize>,
    metadata: BTreeMap<Digest, proto::OpMetadata>,
    head: Digest,
}

impl Definition {
    pub(crate) fn new(
        ops: Vec<(Digest, proto::Op)>,
        metadata: BTreeMap<Digest, proto::OpMetadata>,
        head: Digest,
    ) -> Self {
        let index = ops
            .iter()
            .enumerate()
            .map(|(i, (digest, _))| (digest.clone(), i))
            .collect();
        Self {
            ops,
            index,
            metadata,
            head,
        }
    }

    /// The digest of the op producing the result.
    pub fn head(&self) -> &Digest {
        &self.head
    }

    /// All ops, dependencies first.
    pub fn ops(&self) -> impl Iterator<Item = (&Digest, &proto::Op)> {
        self.ops.iter().map(|(digest, op)| (digest, op))
    }

    pub fn get(&self, digest: &Digest) -> Option<&proto::Op> {
        self.index.get(digest).map(|i| &self.ops[*i].1)
    }

    pub fn custom_name(&self, digest: &Digest) -> Option<&str> {
        self.metadata
            .get(digest)
            .and_then(|m| m.description.get(CUSTOM_NAME_KEY))
            .map(String::as_str)
    }

    pub fn to_pb(&self) -> proto::Definition {
        let terminal = proto::Op {
            inputs: vec![proto::Input {
                digest: self.head.to_string(),
                index: 0,
            }],
            op: None,
            platform: None,
        };

        proto::Definition {
            def: self
                .ops
                .iter()
                .map(|(_, op)| op)
                .chain(std::iter::once(&terminal))
                .map(|op| op.encode_to_vec().into())
                .collect(),
            metadata: self
                .metadata
                .iter()
                .map(|(digest, m)| (digest.to_string(), m.clone()))
                .collect(),
        }
    }
}

impl TryFrom<proto::Definition> for Definition {
    type Error = Error;

    /// Decodes and validates a definition: all ops need to decode, inputs
    /// need to refer to ops earlier in the list, and the last op needs to be
    /// a terminal op pointing at the head.
    fn try_from(value: proto::Definition) -> Result<Self, Self::Error> {
        let (terminal, ops) = value.def.split_last().ok_or(Error::EmptyDefinition)?;

        let mut decoded: Vec<(Digest, proto::Op)> = Vec::with_capacity(ops.len());
        let mut known: HashMap<Digest, usize> = HashMap::with_capacity(ops.len());

        for (position, data) in ops.iter().enumerate() {
            let op = proto::Op::decode(data.clone())
                .map_err(|e| Error::DecodeOp(position, e))?;
            if op.op.is_none() {
                return Err(Error::MissingOpBody(position));
            }
            for input in &op.inputs {
                let input_digest: Digest = input.digest.parse()?;
                if !known.contains_key(&input_digest) {
                    return Err(Error::UnknownInput(position, input.digest.clone()));
                }
            }

            // duplicates are allowed, but only kept once.
            let digest = Digest::of(data);
            if !known.contains_key(&digest) {
                known.insert(digest.clone(), decoded.len());
                decoded.push((digest, op));
            }
        }

        let terminal = proto::Op::decode(terminal.clone())
            .map_err(|e| Error::DecodeOp(ops.len(), e))?;
        if terminal.op.is_some() || terminal.inputs.len() != 1 {
            return Err(Error::InvalidTerminalOp);
        }
        let head: Digest = terminal.inputs[0].digest.parse()?;
        if !known.contains_key(&head) {
            return Err(Error::UnknownInput(ops.len(), terminal.inputs[0].digest.clone()));
        }

        let mut metadata = BTreeMap::new();
        for (digest, m) in value.metadata {
            let digest: Digest = digest.parse()?;
            // metadata for ops not in the graph carries no meaning.
            if known.contains_key(&digest) {
                metadata.insert(digest, m);
            }
        }

        Ok(Definition::new(decoded, metadata, head))
    }
}
