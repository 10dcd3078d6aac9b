//! Single-key output descriptor parsing
//!
//! Supports `pkh(`, `sh(wpkh(`, `wpkh(` and key-path-only `tr(` wrapping
//! one extended public key with an optional `[fingerprint/path]` origin
//! and a `/chain/*` suffix. Multi-key and script-tree descriptors are
//! rejected as unsupported.

use crate::xpub::ExtendedPubKey;
use crate::{Error, Result};
use bitcoin::bip32::{ChildNumber, DerivationPath, Fingerprint};
use satchel_params::{NetworkType, ScriptType};
use std::fmt;
use std::str::FromStr;

const INPUT_CHARSET: &str =
    "0123456789()[],'/*abcdefgh@:$%{}IJKLMNOPQRSTUVWXYZ&+-.;<=>?!^_|~ijklmnopqrstuvwxyzABCDEFGH`#\"\\ ";
const CHECKSUM_CHARSET: &[u8] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const CHECKSUM_LEN: usize = 8;

/// Wrappers in match order: nested forms before their inner forms.
const WRAPPERS: [ScriptType; 4] = [
    ScriptType::WrappedSegwit,
    ScriptType::NativeSegwit,
    ScriptType::Taproot,
    ScriptType::Legacy,
];

fn polymod(c: u64, val: u64) -> u64 {
    let c0 = c >> 35;
    let mut c = ((c & 0x7_ffff_ffff) << 5) ^ val;
    if c0 & 1 != 0 {
        c ^= 0xf5_dee5_1989;
    }
    if c0 & 2 != 0 {
        c ^= 0xa9_fdca_3312;
    }
    if c0 & 4 != 0 {
        c ^= 0x1b_ab10_e32d;
    }
    if c0 & 8 != 0 {
        c ^= 0x37_06b1_677a;
    }
    if c0 & 16 != 0 {
        c ^= 0x64_4d62_6ffd;
    }
    c
}

/// BIP-380 descriptor checksum of a descriptor body (without `#...`)
pub fn descriptor_checksum(body: &str) -> Result<String> {
    let mut c = 1u64;
    let mut cls = 0u64;
    let mut clscount = 0;

    for ch in body.chars() {
        let pos = INPUT_CHARSET
            .find(ch)
            .ok_or_else(|| Error::InvalidDescriptor(format!("invalid character '{ch}'")))?
            as u64;
        c = polymod(c, pos & 31);
        cls = cls * 3 + (pos >> 5);
        clscount += 1;
        if clscount == 3 {
            c = polymod(c, cls);
            cls = 0;
            clscount = 0;
        }
    }
    if clscount > 0 {
        c = polymod(c, cls);
    }
    for _ in 0..CHECKSUM_LEN {
        c = polymod(c, 0);
    }
    c ^= 1;

    Ok((0..CHECKSUM_LEN)
        .map(|j| CHECKSUM_CHARSET[((c >> (5 * (7 - j))) & 31) as usize] as char)
        .collect())
}

/// Key origin: master fingerprint and path to the embedded key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyOrigin {
    /// Master key fingerprint
    pub fingerprint: Fingerprint,
    /// Path from the master key
    pub path: DerivationPath,
}

/// A parsed single-key descriptor
#[derive(Debug, Clone)]
pub struct ParsedDescriptor {
    script_type: ScriptType,
    origin: Option<KeyOrigin>,
    key_text: String,
    key: ExtendedPubKey,
    steps: Vec<ChildNumber>,
    ranged: bool,
}

impl ParsedDescriptor {
    /// Parse a descriptor, validating its checksum when one is attached
    pub fn parse(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        let (body, checksum) = match descriptor.split_once('#') {
            Some((body, checksum)) => (body, Some(checksum)),
            None => (descriptor, None),
        };

        if let Some(checksum) = checksum {
            let expected = descriptor_checksum(body)?;
            if checksum != expected {
                return Err(Error::InvalidDescriptor(format!(
                    "checksum mismatch: expected {expected}, got {checksum}"
                )));
            }
        }

        let (script_type, inner) = strip_wrapper(body)?;
        if inner.contains(',') || inner.contains('(') {
            return Err(Error::UnsupportedDescriptor(
                "only single-key descriptors are supported".to_string(),
            ));
        }

        let (origin, key_expr) = split_origin(inner)?;
        let mut parts = key_expr.split('/');
        let key_text = parts
            .next()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::InvalidDescriptor("missing key".to_string()))?
            .to_string();

        let mut steps = Vec::new();
        let mut ranged = false;
        for part in parts {
            if ranged {
                return Err(Error::InvalidDescriptor(
                    "wildcard must be the last step".to_string(),
                ));
            }
            match part {
                "*" => ranged = true,
                "*'" | "*h" | "*H" => {
                    return Err(Error::UnsupportedDescriptor(
                        "hardened wildcard cannot be derived from a public key".to_string(),
                    ))
                }
                step => {
                    let child = parse_step(step)?;
                    if child.is_hardened() {
                        return Err(Error::UnsupportedDescriptor(format!(
                            "hardened step '{step}' after a public key"
                        )));
                    }
                    steps.push(child);
                }
            }
        }

        let key = ExtendedPubKey::parse(&key_text)
            .map_err(|e| Error::InvalidDescriptor(format!("embedded key: {e}")))?
            .with_script_type(script_type);

        Ok(Self {
            script_type,
            origin,
            key_text,
            key,
            steps,
            ranged,
        })
    }

    /// Build the canonical ranged descriptor for an extended key on `chain`
    pub fn from_extended_key(key: &ExtendedPubKey, origin: Option<KeyOrigin>, chain: u32) -> Result<Self> {
        Ok(Self {
            script_type: key.script_type(),
            origin,
            key_text: key.standard(),
            key: key.clone(),
            steps: vec![ChildNumber::from_normal_idx(chain)?],
            ranged: true,
        })
    }

    /// Pin the embedded key to a network (test networks share key versions)
    pub fn for_network(mut self, network: NetworkType) -> Result<Self> {
        self.key = ExtendedPubKey::parse_for_network(&self.key_text, Some(network))?
            .with_script_type(self.script_type);
        Ok(self)
    }

    /// Script type selected by the wrapper
    pub fn script_type(&self) -> ScriptType {
        self.script_type
    }

    /// Key origin, when present
    pub fn origin(&self) -> Option<&KeyOrigin> {
        self.origin.as_ref()
    }

    /// Embedded extended key
    pub fn key(&self) -> &ExtendedPubKey {
        &self.key
    }

    /// Network of the embedded key
    pub fn network(&self) -> NetworkType {
        self.key.network()
    }

    /// Fixed derivation steps after the key (wildcard excluded)
    pub fn steps(&self) -> &[ChildNumber] {
        &self.steps
    }

    /// Whether the descriptor ends in `/*`
    pub fn is_ranged(&self) -> bool {
        self.ranged
    }

    /// Chain digit (0 external, 1 internal) of a ranged descriptor whose
    /// last fixed step is one. Non-ranged descriptors have no chain.
    pub fn chain(&self) -> Option<u32> {
        if !self.ranged {
            return None;
        }
        match self.steps.last() {
            Some(ChildNumber::Normal { index }) if *index <= 1 => Some(*index),
            _ => None,
        }
    }

    /// Same descriptor with the chain digit toggled (0 ↔ 1)
    pub fn change_descriptor(&self) -> Result<Self> {
        let chain = self.chain().ok_or_else(|| {
            Error::UnsupportedDescriptor("descriptor has no chain step to toggle".to_string())
        })?;
        let mut toggled = self.clone();
        if let Some(last) = toggled.steps.last_mut() {
            *last = ChildNumber::from_normal_idx(1 - chain)?;
        }
        Ok(toggled)
    }

    /// Descriptor body without checksum
    pub fn body(&self) -> String {
        let (open, close) = self.script_type.descriptor_wrapper();
        let mut out = String::from(open);
        if let Some(origin) = &self.origin {
            out.push('[');
            out.push_str(&origin.fingerprint.to_string());
            for child in origin.path.as_ref() {
                out.push('/');
                out.push_str(&render_step(child));
            }
            out.push(']');
        }
        out.push_str(&self.key_text);
        for child in &self.steps {
            out.push('/');
            out.push_str(&render_step(child));
        }
        if self.ranged {
            out.push_str("/*");
        }
        out.push_str(close);
        out
    }

    /// Descriptor with its checksum appended
    pub fn to_string_with_checksum(&self) -> Result<String> {
        let body = self.body();
        let checksum = descriptor_checksum(&body)?;
        Ok(format!("{body}#{checksum}"))
    }
}

impl fmt::Display for ParsedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_string_with_checksum() {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str(&self.body()),
        }
    }
}

impl FromStr for ParsedDescriptor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn strip_wrapper(body: &str) -> Result<(ScriptType, &str)> {
    for script_type in WRAPPERS {
        let (open, close) = script_type.descriptor_wrapper();
        if let Some(inner) = body.strip_prefix(open) {
            return inner
                .strip_suffix(close)
                .map(|inner| (script_type, inner))
                .ok_or_else(|| Error::InvalidDescriptor(format!("unbalanced '{open}'")));
        }
    }
    let name = body.split('(').next().unwrap_or(body);
    Err(Error::UnsupportedDescriptor(format!("wrapper '{name}'")))
}

fn split_origin(inner: &str) -> Result<(Option<KeyOrigin>, &str)> {
    let Some(rest) = inner.strip_prefix('[') else {
        return Ok((None, inner));
    };
    let (origin, key_expr) = rest
        .split_once(']')
        .ok_or_else(|| Error::InvalidDescriptor("unterminated key origin".to_string()))?;

    let mut parts = origin.split('/');
    let fingerprint_hex = parts.next().unwrap_or_default();
    if fingerprint_hex.len() != 8 {
        return Err(Error::InvalidDescriptor(format!(
            "fingerprint '{fingerprint_hex}' must be 8 hex characters"
        )));
    }
    let fingerprint = Fingerprint::from_str(fingerprint_hex)
        .map_err(|e| Error::InvalidDescriptor(format!("fingerprint: {e}")))?;
    let path = parts.map(parse_step).collect::<Result<Vec<_>>>()?;

    Ok((
        Some(KeyOrigin {
            fingerprint,
            path: DerivationPath::from(path),
        }),
        key_expr,
    ))
}

fn parse_step(step: &str) -> Result<ChildNumber> {
    let (digits, hardened) = match step.strip_suffix(&['\'', 'h', 'H'][..]) {
        Some(digits) => (digits, true),
        None => (step, false),
    };
    let index: u32 = digits
        .parse()
        .map_err(|_| Error::InvalidDescriptor(format!("invalid path step '{step}'")))?;
    let child = if hardened {
        ChildNumber::from_hardened_idx(index)
    } else {
        ChildNumber::from_normal_idx(index)
    };
    child.map_err(|e| Error::InvalidDescriptor(format!("path step '{step}': {e}")))
}

pub(crate) fn render_step(child: &ChildNumber) -> String {
    match child {
        ChildNumber::Normal { index } => index.to_string(),
        ChildNumber::Hardened { index } => format!("{index}'"),
    }
}
