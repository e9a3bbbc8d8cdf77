use std::collections::HashMap;

use byteorder::{ByteOrder as _, LittleEndian};
use pcd_core::pointcloud::scalar::Scalar;

use super::array::{Dtype, DtypeKind, NdArray};
use crate::ParseError;

// Pickle opcodes understood by the decoder, named as in CPython's pickletools.
mod op {
    pub const MARK: u8 = b'(';
    pub const STOP: u8 = b'.';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const NONE: u8 = b'N';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const BINUNICODE: u8 = b'X';
    pub const APPEND: u8 = b'a';
    pub const BUILD: u8 = b'b';
    pub const GLOBAL: u8 = b'c';
    pub const DICT: u8 = b'd';
    pub const EMPTY_DICT: u8 = b'}';
    pub const APPENDS: u8 = b'e';
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const LIST: u8 = b'l';
    pub const EMPTY_LIST: u8 = b']';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const SETITEM: u8 = b's';
    pub const TUPLE: u8 = b't';
    pub const EMPTY_TUPLE: u8 = b')';
    pub const SETITEMS: u8 = b'u';
    pub const BINFLOAT: u8 = b'G';
    pub const REDUCE: u8 = b'R';
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const PROTO: u8 = 0x80;
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const LONG1: u8 = 0x8a;
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES8: u8 = 0x8e;
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const MEMOIZE: u8 = 0x94;
    pub const FRAME: u8 = 0x95;
    pub const BYTEARRAY8: u8 = 0x96;
}

/// The callables a sample pickle may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Global {
    Reconstruct,
    NdArray,
    Dtype,
    Scalar,
    FromBuffer,
    CodecsEncode,
}

impl Global {
    pub fn resolve(module: &str, name: &str) -> Result<Self, ParseError> {
        let core = matches!(module, "numpy.core.multiarray" | "numpy._core.multiarray");
        let numeric = matches!(module, "numpy.core.numeric" | "numpy._core.numeric");
        match (module, name) {
            (_, "_reconstruct") if core => Ok(Global::Reconstruct),
            (_, "scalar") if core => Ok(Global::Scalar),
            (_, "_frombuffer") if numeric => Ok(Global::FromBuffer),
            ("numpy", "ndarray") => Ok(Global::NdArray),
            ("numpy", "dtype") => Ok(Global::Dtype),
            ("_codecs", "encode") => Ok(Global::CodecsEncode),
            _ => Err(ParseError::UnsupportedGlobal {
                module: module.to_string(),
                name: name.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Global(Global),
    Dtype(Dtype),
    Array(NdArray),
    Scalar(Scalar),
}

impl Value {
    /// Text of a `str`, or of a Python 2 byte string read as latin-1.
    pub fn text(&self) -> Option<String> {
        match self {
            Value::Str(s) => Some(s.clone()),
            Value::Bytes(bytes) => Some(latin1(bytes)),
            _ => None,
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            // Python 2 payloads loaded with the latin-1 codec arrive as `str`.
            Value::Str(s) => s.chars().map(|c| u8::try_from(c).ok()).collect(),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Value::Bool(v) => Some(Scalar::Bool(*v)),
            Value::Int(v) => Some(Scalar::Int(*v)),
            Value::Float(v) => Some(Scalar::F64(*v)),
            Value::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Global(_) => "global",
            Value::Dtype(_) => "dtype",
            Value::Array(_) => "ndarray",
            Value::Scalar(_) => "numpy scalar",
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

/// Decodes a pickle stream into a [`Value`] without executing arbitrary code:
/// only the globals listed in [`Global`] can be called.
pub fn unpickle(data: &[u8]) -> Result<Value, ParseError> {
    Unpickler::new(data).load()
}

struct Slot {
    value: Value,
    memo_key: Option<u32>,
}

struct Unpickler<'a> {
    data: &'a [u8],
    pos: usize,
    stack: Vec<Slot>,
    marks: Vec<usize>,
    memo: HashMap<u32, Value>,
}

impl<'a> Unpickler<'a> {
    fn new(data: &'a [u8]) -> Self {
        Unpickler {
            data,
            pos: 0,
            stack: Vec::new(),
            marks: Vec::new(),
            memo: HashMap::new(),
        }
    }

    fn load(mut self) -> Result<Value, ParseError> {
        loop {
            let offset = self.pos;
            let opcode = self.read_u8()?;
            match opcode {
                op::PROTO => {
                    let protocol = self.read_u8()?;
                    if protocol > 5 {
                        return Err(ParseError::InvalidPickle(format!(
                            "unsupported protocol {protocol}"
                        )));
                    }
                }
                // Framing only groups opcodes for buffered readers.
                op::FRAME => {
                    self.take(8)?;
                }
                op::STOP => return self.pop(),

                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    self.pop()?;
                }
                op::POP_MARK => {
                    self.pop_mark()?;
                }
                op::DUP => {
                    let top = self.top()?;
                    let slot = Slot {
                        value: top.value.clone(),
                        memo_key: top.memo_key,
                    };
                    self.stack.push(slot);
                }

                op::NONE => self.push(Value::None),
                op::NEWTRUE => self.push(Value::Bool(true)),
                op::NEWFALSE => self.push(Value::Bool(false)),
                op::INT => {
                    let line = self.read_line()?;
                    let value = match line {
                        "00" => Value::Bool(false),
                        "01" => Value::Bool(true),
                        _ => Value::Int(line.parse().map_err(|_| {
                            ParseError::InvalidPickle(format!("invalid INT '{line}'"))
                        })?),
                    };
                    self.push(value);
                }
                op::BININT => {
                    let value = LittleEndian::read_i32(self.take(4)?);
                    self.push(Value::Int(value as i64));
                }
                op::BININT1 => {
                    let value = self.read_u8()?;
                    self.push(Value::Int(value as i64));
                }
                op::BININT2 => {
                    let value = LittleEndian::read_u16(self.take(2)?);
                    self.push(Value::Int(value as i64));
                }
                op::LONG1 => {
                    let len = self.read_u8()? as usize;
                    let bytes = self.take(len)?;
                    self.push(Value::Int(decode_long(bytes)?));
                }
                op::BINFLOAT => {
                    let value = byteorder::BigEndian::read_f64(self.take(8)?);
                    self.push(Value::Float(value));
                }

                op::SHORT_BINSTRING => {
                    let len = self.read_u8()? as usize;
                    let bytes = self.take(len)?.to_vec();
                    self.push(Value::Bytes(bytes));
                }
                op::BINSTRING => {
                    let len = self.read_len(4)?;
                    let bytes = self.take(len)?.to_vec();
                    self.push(Value::Bytes(bytes));
                }
                op::SHORT_BINUNICODE => {
                    let len = self.read_u8()? as usize;
                    let text = self.read_utf8(len)?;
                    self.push(Value::Str(text));
                }
                op::BINUNICODE => {
                    let len = self.read_len(4)?;
                    let text = self.read_utf8(len)?;
                    self.push(Value::Str(text));
                }
                op::BINUNICODE8 => {
                    let len = self.read_len(8)?;
                    let text = self.read_utf8(len)?;
                    self.push(Value::Str(text));
                }
                op::SHORT_BINBYTES => {
                    let len = self.read_u8()? as usize;
                    let bytes = self.take(len)?.to_vec();
                    self.push(Value::Bytes(bytes));
                }
                op::BINBYTES => {
                    let len = self.read_len(4)?;
                    let bytes = self.take(len)?.to_vec();
                    self.push(Value::Bytes(bytes));
                }
                op::BINBYTES8 | op::BYTEARRAY8 => {
                    let len = self.read_len(8)?;
                    let bytes = self.take(len)?.to_vec();
                    self.push(Value::Bytes(bytes));
                }

                op::EMPTY_TUPLE => self.push(Value::Tuple(Vec::new())),
                op::EMPTY_LIST => self.push(Value::List(Vec::new())),
                op::EMPTY_DICT => self.push(Value::Dict(Vec::new())),
                op::TUPLE => {
                    let items = self.pop_mark()?;
                    self.push(Value::Tuple(items));
                }
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = (opcode - op::TUPLE1 + 1) as usize;
                    let items = self.pop_n(n)?;
                    self.push(Value::Tuple(items));
                }
                op::LIST => {
                    let items = self.pop_mark()?;
                    self.push(Value::List(items));
                }
                op::DICT => {
                    let items = self.pop_mark()?;
                    let pairs = into_pairs(items)?;
                    self.push(Value::Dict(pairs));
                }
                op::APPEND => {
                    let item = self.pop()?;
                    self.extend_list(vec![item])?;
                }
                op::APPENDS => {
                    let items = self.pop_mark()?;
                    self.extend_list(items)?;
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    self.extend_dict(vec![(key, value)])?;
                }
                op::SETITEMS => {
                    let items = self.pop_mark()?;
                    let pairs = into_pairs(items)?;
                    self.extend_dict(pairs)?;
                }

                op::GLOBAL => {
                    let module = self.read_line()?.to_string();
                    let name = self.read_line()?.to_string();
                    self.push(Value::Global(Global::resolve(&module, &name)?));
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let (Value::Str(module), Value::Str(name)) = (module, name) else {
                        return Err(ParseError::InvalidPickle(
                            "STACK_GLOBAL expects two strings".to_string(),
                        ));
                    };
                    self.push(Value::Global(Global::resolve(&module, &name)?));
                }
                op::REDUCE => {
                    let args = self.pop()?;
                    let callable = self.pop()?;
                    let value = reduce(callable, args)?;
                    self.push(value);
                }
                op::BUILD => {
                    let state = self.pop()?;
                    let slot = self.top_mut()?;
                    match &mut slot.value {
                        Value::Array(array) => array.set_state(state)?,
                        Value::Dtype(dtype) => dtype.set_state(state)?,
                        other => {
                            return Err(ParseError::InvalidPickle(format!(
                                "cannot BUILD a {}",
                                other.kind()
                            )))
                        }
                    }
                }

                op::PUT => {
                    let key = self.read_line()?;
                    let key = key.parse().map_err(|_| {
                        ParseError::InvalidPickle(format!("invalid memo key '{key}'"))
                    })?;
                    self.memoize(key)?;
                }
                op::BINPUT => {
                    let key = self.read_u8()? as u32;
                    self.memoize(key)?;
                }
                op::LONG_BINPUT => {
                    let key = LittleEndian::read_u32(self.take(4)?);
                    self.memoize(key)?;
                }
                op::MEMOIZE => {
                    let key = self.memo.len() as u32;
                    self.memoize(key)?;
                }
                op::GET => {
                    let key = self.read_line()?;
                    let key = key.parse().map_err(|_| {
                        ParseError::InvalidPickle(format!("invalid memo key '{key}'"))
                    })?;
                    self.recall(key)?;
                }
                op::BINGET => {
                    let key = self.read_u8()? as u32;
                    self.recall(key)?;
                }
                op::LONG_BINGET => {
                    let key = LittleEndian::read_u32(self.take(4)?);
                    self.recall(key)?;
                }

                _ => return Err(ParseError::UnknownOpcode { opcode, offset }),
            }
        }
    }

    fn read_u8(&mut self) -> Result<u8, ParseError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ParseError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(ParseError::Truncated {
                offset: self.data.len(),
            })?;
        let data = self.data;
        let bytes = &data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_len(&mut self, width: usize) -> Result<usize, ParseError> {
        let len = LittleEndian::read_uint(self.take(width)?, width);
        usize::try_from(len).map_err(|_| ParseError::Truncated {
            offset: self.data.len(),
        })
    }

    fn read_utf8(&mut self, len: usize) -> Result<String, ParseError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ParseError::InvalidPickle(format!("invalid utf-8 string: {e}")))
    }

    fn read_line(&mut self) -> Result<&'a str, ParseError> {
        let data = self.data;
        let rest = &data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or(ParseError::Truncated {
                offset: self.data.len(),
            })?;
        let line = self.take(len + 1)?;
        std::str::from_utf8(&line[..len])
            .map_err(|e| ParseError::InvalidPickle(format!("invalid text line: {e}")))
    }

    fn push(&mut self, value: Value) {
        self.stack.push(Slot {
            value,
            memo_key: None,
        });
    }

    // The memo keeps the value an object had when it left the stack, which is
    // its final state: opcodes only mutate objects on the stack.
    fn pop_slot(&mut self, slot: Slot) -> Value {
        if let Some(key) = slot.memo_key {
            self.memo.insert(key, slot.value.clone());
        }
        slot.value
    }

    fn pop(&mut self) -> Result<Value, ParseError> {
        if self.marks.last().is_some_and(|&mark| mark >= self.stack.len()) {
            return Err(ParseError::InvalidPickle("pop across a mark".to_string()));
        }
        let slot = self.stack.pop().ok_or_else(stack_underflow)?;
        Ok(self.pop_slot(slot))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, ParseError> {
        let floor = self.marks.last().copied().unwrap_or(0);
        if self.stack.len() < floor + n {
            return Err(stack_underflow());
        }
        let slots = self.stack.split_off(self.stack.len() - n);
        Ok(slots.into_iter().map(|slot| self.pop_slot(slot)).collect())
    }

    fn pop_mark(&mut self) -> Result<Vec<Value>, ParseError> {
        let mark = self
            .marks
            .pop()
            .ok_or_else(|| ParseError::InvalidPickle("missing MARK".to_string()))?;
        let slots = self.stack.split_off(mark);
        Ok(slots.into_iter().map(|slot| self.pop_slot(slot)).collect())
    }

    fn top(&self) -> Result<&Slot, ParseError> {
        self.stack.last().ok_or_else(stack_underflow)
    }

    fn top_mut(&mut self) -> Result<&mut Slot, ParseError> {
        self.stack.last_mut().ok_or_else(stack_underflow)
    }

    fn memoize(&mut self, key: u32) -> Result<(), ParseError> {
        let slot = self.stack.last_mut().ok_or_else(stack_underflow)?;
        slot.memo_key = Some(key);
        let value = slot.value.clone();
        self.memo.insert(key, value);
        Ok(())
    }

    fn recall(&mut self, key: u32) -> Result<(), ParseError> {
        // An object still on the stack may have changed since it was memoized.
        let live = self
            .stack
            .iter()
            .rev()
            .find(|slot| slot.memo_key == Some(key))
            .map(|slot| slot.value.clone());
        let value = match live {
            Some(value) => value,
            None => self.memo.get(&key).cloned().ok_or_else(|| {
                ParseError::InvalidPickle(format!("memo key {key} is not defined"))
            })?,
        };
        self.stack.push(Slot {
            value,
            memo_key: Some(key),
        });
        Ok(())
    }

    fn extend_list(&mut self, items: Vec<Value>) -> Result<(), ParseError> {
        match &mut self.top_mut()?.value {
            Value::List(list) => {
                list.extend(items);
                Ok(())
            }
            other => Err(ParseError::InvalidPickle(format!(
                "cannot append to a {}",
                other.kind()
            ))),
        }
    }

    fn extend_dict(&mut self, pairs: Vec<(Value, Value)>) -> Result<(), ParseError> {
        match &mut self.top_mut()?.value {
            Value::Dict(dict) => {
                for (key, value) in pairs {
                    match dict.iter_mut().find(|(k, _)| *k == key) {
                        Some(entry) => entry.1 = value,
                        None => dict.push((key, value)),
                    }
                }
                Ok(())
            }
            other => Err(ParseError::InvalidPickle(format!(
                "cannot set an item on a {}",
                other.kind()
            ))),
        }
    }
}

fn stack_underflow() -> ParseError {
    ParseError::InvalidPickle("stack underflow".to_string())
}

fn into_pairs(items: Vec<Value>) -> Result<Vec<(Value, Value)>, ParseError> {
    if items.len() % 2 != 0 {
        return Err(ParseError::InvalidPickle(
            "odd number of dict items".to_string(),
        ));
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(key), Some(value)) = (items.next(), items.next()) {
        pairs.push((key, value));
    }
    Ok(pairs)
}

// Little-endian two's complement, as written by LONG1.
fn decode_long(bytes: &[u8]) -> Result<i64, ParseError> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 8 {
        return Err(ParseError::InvalidPickle(
            "integer does not fit in 64 bits".to_string(),
        ));
    }
    let negative = bytes[bytes.len() - 1] & 0x80 != 0;
    let mut buf = if negative { [0xff; 8] } else { [0; 8] };
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(LittleEndian::read_i64(&buf))
}

fn reduce(callable: Value, args: Value) -> Result<Value, ParseError> {
    let Value::Global(global) = callable else {
        return Err(ParseError::InvalidPickle(format!(
            "cannot call a {}",
            callable.kind()
        )));
    };
    let Value::Tuple(args) = args else {
        return Err(ParseError::InvalidPickle(
            "REDUCE arguments are not a tuple".to_string(),
        ));
    };

    match global {
        // `_reconstruct(ndarray, (0,), b'b')`; the contents arrive with BUILD.
        Global::Reconstruct => Ok(Value::Array(NdArray::placeholder())),
        Global::Dtype => {
            let code = args.first().and_then(Value::text).ok_or_else(|| {
                ParseError::InvalidPickle("dtype() without a type code".to_string())
            })?;
            Ok(Value::Dtype(Dtype::from_code(&code)?))
        }
        Global::Scalar => {
            let mut args = args.into_iter();
            let (Some(Value::Dtype(dtype)), Some(payload)) = (args.next(), args.next()) else {
                return Err(ParseError::InvalidPickle(
                    "scalar() expects a dtype and a payload".to_string(),
                ));
            };
            if dtype.kind == DtypeKind::Object {
                return Ok(payload);
            }
            let bytes = payload.into_bytes().ok_or_else(|| {
                ParseError::InvalidPickle("scalar() payload is not bytes".to_string())
            })?;
            match dtype.decode(&bytes)?.as_slice() {
                [value] => Ok(Value::Scalar(*value)),
                _ => Err(ParseError::InvalidPickle(
                    "scalar() payload does not hold one value".to_string(),
                )),
            }
        }
        Global::FromBuffer => Ok(Value::Array(NdArray::from_buffer(args)?)),
        // Protocol 2 spells `bytes` as `_codecs.encode(text, 'latin1')`.
        Global::CodecsEncode => {
            let text = args.first().and_then(Value::text).ok_or_else(|| {
                ParseError::InvalidPickle("encode() without text".to_string())
            })?;
            let bytes = Value::Str(text).into_bytes().ok_or_else(|| {
                ParseError::InvalidPickle("encode() text is not latin-1".to_string())
            })?;
            Ok(Value::Bytes(bytes))
        }
        Global::NdArray => Err(ParseError::InvalidPickle(
            "ndarray cannot be called directly".to_string(),
        )),
    }
}
