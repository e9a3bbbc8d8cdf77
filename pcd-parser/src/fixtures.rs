//! Writes sample files byte-compatible with what `np.save` produces for a
//! pickled `{"xyz": ..., "rgb": ...}` record, for tests of this crate and its users.

use std::{collections::HashMap, fs, io, path::Path};

/// A 2-D numeric array to store under one record field.
#[derive(Debug, Clone)]
pub struct Channel {
    code: &'static str,
    itemsize: usize,
    big_endian: bool,
    shape: (usize, usize),
    bytes: Vec<u8>,
}

impl Channel {
    pub fn f32<const N: usize>(rows: &[[f32; N]]) -> Self {
        let bytes = rows.iter().flatten().flat_map(|v| v.to_le_bytes()).collect();
        Self::new("f4", 4, (rows.len(), N), bytes)
    }

    pub fn f64<const N: usize>(rows: &[[f64; N]]) -> Self {
        let bytes = rows.iter().flatten().flat_map(|v| v.to_le_bytes()).collect();
        Self::new("f8", 8, (rows.len(), N), bytes)
    }

    pub fn u8<const N: usize>(rows: &[[u8; N]]) -> Self {
        let bytes = rows.iter().flatten().copied().collect();
        Self::new("u1", 1, (rows.len(), N), bytes)
    }

    fn new(code: &'static str, itemsize: usize, shape: (usize, usize), bytes: Vec<u8>) -> Self {
        Channel {
            code,
            itemsize,
            big_endian: false,
            shape,
            bytes,
        }
    }

    /// Same values, stored big-endian as `astype('>f4')` would.
    pub fn big_endian(mut self) -> Self {
        for item in self.bytes.chunks_mut(self.itemsize) {
            item.reverse();
        }
        self.big_endian = true;
        self
    }

    fn endian(&self) -> &'static str {
        if self.itemsize == 1 {
            "|"
        } else if self.big_endian {
            ">"
        } else {
            "<"
        }
    }
}

/// `.npy` bytes of a record with `xyz` and `rgb`.
pub fn sample_bytes(xyz: &Channel, rgb: &Channel, protocol: u8) -> Vec<u8> {
    record_bytes(&[("xyz", xyz), ("rgb", rgb)], protocol)
}

/// `.npy` bytes of a record with arbitrary fields.
pub fn record_bytes(fields: &[(&str, &Channel)], protocol: u8) -> Vec<u8> {
    let payload = Encoder::new(protocol).record(fields);
    npy_bytes("|O", &[], &payload)
}

/// A sample in the layout NumPy 1.x writes by default (pickle protocol 3).
pub fn write_sample(path: impl AsRef<Path>, xyz: &Channel, rgb: &Channel) -> io::Result<()> {
    fs::write(path, sample_bytes(xyz, rgb, 3))
}

/// Wraps a payload in a version 1.0 `.npy` container.
pub fn npy_bytes(descr: &str, shape: &[usize], payload: &[u8]) -> Vec<u8> {
    let shape = match shape {
        [] => "()".to_string(),
        [n] => format!("({n},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
    // Preamble plus header is padded to a multiple of 64 and ends with a newline.
    let total = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - total % 64) % 64));
    header.push('\n');

    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
    out
}

struct Encoder {
    protocol: u8,
    out: Vec<u8>,
    memo: u32,
    memoized: HashMap<String, u32>,
}

impl Encoder {
    fn new(protocol: u8) -> Self {
        Encoder {
            protocol,
            out: Vec::new(),
            memo: 0,
            memoized: HashMap::new(),
        }
    }

    fn record(mut self, fields: &[(&str, &Channel)]) -> Vec<u8> {
        self.reconstruct();
        // Object array state: (1, (), dtype('O'), False, [record]).
        self.out.push(b'(');
        self.int(1);
        self.out.push(b')');
        self.dtype("O8", "|", 63);
        self.out.push(0x89);
        self.out.push(b']');
        self.memoize();
        self.out.push(b'}');
        self.memoize();
        self.out.push(b'(');
        for (name, channel) in fields {
            self.unicode(name);
            self.array(channel);
        }
        self.out.extend_from_slice(b"uat");
        self.memoize();
        self.out.extend_from_slice(b"b.");

        let mut pickle = vec![0x80, self.protocol];
        if self.protocol >= 4 {
            pickle.push(0x95);
            pickle.extend_from_slice(&(self.out.len() as u64).to_le_bytes());
        }
        pickle.extend_from_slice(&self.out);
        pickle
    }

    fn core_module(&self, name: &str) -> String {
        if self.protocol >= 5 {
            format!("numpy._core.{name}")
        } else {
            format!("numpy.core.{name}")
        }
    }

    fn memoize(&mut self) -> u32 {
        let key = self.memo;
        if self.protocol >= 4 {
            self.out.push(0x94);
        } else if key < 256 {
            self.out.extend_from_slice(&[b'q', key as u8]);
        } else {
            self.out.push(b'r');
            self.out.extend_from_slice(&key.to_le_bytes());
        }
        self.memo += 1;
        key
    }

    fn get(&mut self, key: u32) {
        if key < 256 {
            self.out.extend_from_slice(&[b'h', key as u8]);
        } else {
            self.out.push(b'j');
            self.out.extend_from_slice(&key.to_le_bytes());
        }
    }

    // Emits an object once and memo references to it afterwards, as pickle does.
    fn shared(&mut self, id: String, emit: impl FnOnce(&mut Self) -> u32) {
        if let Some(&key) = self.memoized.get(&id) {
            self.get(key);
            return;
        }
        let key = emit(self);
        self.memoized.insert(id, key);
    }

    fn global(&mut self, module: &str, name: &str) {
        self.shared(format!("global:{module}.{name}"), |e| {
            if e.protocol >= 4 {
                e.unicode(module);
                e.unicode(name);
                e.out.push(0x93);
            } else {
                e.out.push(b'c');
                e.out
                    .extend_from_slice(format!("{module}\n{name}\n").as_bytes());
            }
            e.memoize()
        });
    }

    fn unicode(&mut self, text: &str) {
        if self.protocol >= 4 && text.len() < 256 {
            self.out.extend_from_slice(&[0x8c, text.len() as u8]);
        } else {
            self.out.push(b'X');
            self.out.extend_from_slice(&(text.len() as u32).to_le_bytes());
        }
        self.out.extend_from_slice(text.as_bytes());
        self.memoize();
    }

    fn int(&mut self, value: i64) {
        match value {
            0..=0xff => self.out.extend_from_slice(&[b'K', value as u8]),
            0x100..=0xffff => {
                self.out.push(b'M');
                self.out.extend_from_slice(&(value as u16).to_le_bytes());
            }
            _ => {
                self.out.push(b'J');
                self.out.extend_from_slice(&(value as i32).to_le_bytes());
            }
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        if self.protocol >= 3 {
            if bytes.len() < 256 {
                self.out.extend_from_slice(&[b'C', bytes.len() as u8]);
            } else {
                self.out.push(b'B');
                self.out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            }
            self.out.extend_from_slice(bytes);
        } else {
            // Protocol 2 has no bytes opcode.
            let text: String = bytes.iter().map(|&b| b as char).collect();
            self.global("_codecs", "encode");
            self.unicode(&text);
            self.unicode("latin1");
            self.out.push(0x86);
            self.memoize();
            self.out.push(b'R');
        }
        self.memoize();
    }

    fn shape(&mut self, dims: &[usize]) {
        if dims.is_empty() {
            self.out.push(b')');
            return;
        }
        for &dim in dims {
            self.int(dim as i64);
        }
        self.out.push(0x84 + dims.len() as u8);
        self.memoize();
    }

    fn dtype(&mut self, code: &str, endian: &str, flags: i64) {
        self.shared(format!("dtype:{endian}{code}"), |e| {
            e.global("numpy", "dtype");
            e.unicode(code);
            e.out.extend_from_slice(&[0x89, 0x88, 0x87]);
            e.memoize();
            e.out.push(b'R');
            let key = e.memoize();
            e.out.push(b'(');
            e.int(3);
            e.unicode(endian);
            e.out.extend_from_slice(b"NNN");
            e.int(-1);
            e.int(-1);
            e.int(flags);
            e.out.push(b't');
            e.memoize();
            e.out.push(b'b');
            key
        });
    }

    fn reconstruct(&mut self) {
        let module = self.core_module("multiarray");
        self.global(&module, "_reconstruct");
        self.global("numpy", "ndarray");
        self.shape(&[0]);
        self.bytes(b"b");
        self.out.push(0x87);
        self.memoize();
        self.out.push(b'R');
        self.memoize();
    }

    fn array(&mut self, channel: &Channel) {
        let dims = [channel.shape.0, channel.shape.1];
        if self.protocol >= 5 {
            // _frombuffer(PickleBuffer, dtype, shape, order)
            let module = self.core_module("numeric");
            self.global(&module, "_frombuffer");
            self.out.push(b'(');
            self.out.push(0x96);
            self.out
                .extend_from_slice(&(channel.bytes.len() as u64).to_le_bytes());
            self.out.extend_from_slice(&channel.bytes);
            self.memoize();
            self.dtype(channel.code, channel.endian(), 0);
            self.shape(&dims);
            self.unicode("C");
            self.out.push(b't');
            self.memoize();
            self.out.push(b'R');
            self.memoize();
            return;
        }

        self.reconstruct();
        self.out.push(b'(');
        self.int(1);
        self.shape(&dims);
        self.dtype(channel.code, channel.endian(), 0);
        self.out.push(0x89);
        self.bytes(&channel.bytes);
        self.out.push(b't');
        self.memoize();
        self.out.push(b'b');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::npy::header::read_header;

    #[test]
    fn test_header_is_aligned() {
        let data = npy_bytes("|O", &[], b".");
        let (header, offset) = read_header(&data).unwrap();
        assert!(header.is_object());
        assert_eq!(offset % 64, 0);
    }
}
