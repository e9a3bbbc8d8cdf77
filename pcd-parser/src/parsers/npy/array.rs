use byteorder::{BigEndian, ByteOrder, LittleEndian};
use pcd_core::pointcloud::scalar::Scalar;

use super::pickle::Value;
use crate::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtypeKind {
    Bool,
    Int,
    UInt,
    Float,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dtype {
    pub kind: DtypeKind,
    pub itemsize: usize,
    pub endian: Endian,
}

impl Default for Dtype {
    fn default() -> Self {
        Dtype {
            kind: DtypeKind::Float,
            itemsize: 8,
            endian: Endian::Little,
        }
    }
}

impl Dtype {
    /// Builds a dtype from the code NumPy pickles it with, e.g. `f4`, `u1`, `O8`.
    pub fn from_code(code: &str) -> Result<Self, ParseError> {
        let unsupported = || ParseError::UnsupportedDtype(code.to_string());

        let (endian, rest) = match code.chars().next() {
            Some('>') => (Endian::Big, &code[1..]),
            Some('<' | '=' | '|') => (Endian::Little, &code[1..]),
            _ => (Endian::Little, code),
        };
        let mut chars = rest.chars();
        let kind = match chars.next() {
            Some('b') => DtypeKind::Bool,
            Some('i') => DtypeKind::Int,
            Some('u') => DtypeKind::UInt,
            Some('f') => DtypeKind::Float,
            Some('O') => DtypeKind::Object,
            _ => return Err(unsupported()),
        };
        let itemsize: usize = chars.as_str().parse().map_err(|_| unsupported())?;

        let valid = match kind {
            DtypeKind::Bool => itemsize == 1,
            DtypeKind::Int | DtypeKind::UInt => matches!(itemsize, 1 | 2 | 4 | 8),
            DtypeKind::Float => matches!(itemsize, 4 | 8),
            DtypeKind::Object => matches!(itemsize, 4 | 8),
        };
        if !valid {
            return Err(unsupported());
        }

        Ok(Dtype {
            kind,
            itemsize,
            endian,
        })
    }

    /// Applies the pickled dtype state `(version, endian, subdescr, names, fields, ...)`.
    pub(crate) fn set_state(&mut self, state: Value) -> Result<(), ParseError> {
        let Value::Tuple(items) = state else {
            return Err(ParseError::InvalidPickle("dtype state is not a tuple".to_string()));
        };
        if let Some(names) = items.get(3) {
            if *names != Value::None {
                return Err(ParseError::UnsupportedDtype("structured".to_string()));
            }
        }
        match items.get(1).and_then(Value::text).as_deref() {
            Some(">") => self.endian = Endian::Big,
            Some("<" | "=" | "|") => self.endian = Endian::Little,
            Some(other) => {
                return Err(ParseError::InvalidPickle(format!(
                    "unknown byte order '{other}'"
                )))
            }
            None => {
                return Err(ParseError::InvalidPickle(
                    "dtype state has no byte order".to_string(),
                ))
            }
        }
        Ok(())
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<Scalar>, ParseError> {
        if self.kind == DtypeKind::Object {
            return Err(ParseError::InvalidPickle(
                "object arrays carry no raw payload".to_string(),
            ));
        }
        if bytes.len() % self.itemsize != 0 {
            return Err(ParseError::InvalidPickle(format!(
                "payload of {} bytes is not a multiple of the item size {}",
                bytes.len(),
                self.itemsize
            )));
        }
        Ok(match self.endian {
            Endian::Little => decode_with::<LittleEndian>(self, bytes),
            Endian::Big => decode_with::<BigEndian>(self, bytes),
        })
    }
}

fn decode_with<B: ByteOrder>(dtype: &Dtype, bytes: &[u8]) -> Vec<Scalar> {
    bytes
        .chunks_exact(dtype.itemsize)
        .map(|c| match (dtype.kind, dtype.itemsize) {
            (DtypeKind::Bool, _) => Scalar::Bool(c[0] != 0),
            (DtypeKind::Int, 1) => Scalar::Int(c[0] as i8 as i64),
            (DtypeKind::Int, 2) => Scalar::Int(B::read_i16(c) as i64),
            (DtypeKind::Int, 4) => Scalar::Int(B::read_i32(c) as i64),
            (DtypeKind::Int, _) => Scalar::Int(B::read_i64(c)),
            (DtypeKind::UInt, 1) => Scalar::UInt(c[0] as u64),
            (DtypeKind::UInt, 2) => Scalar::UInt(B::read_u16(c) as u64),
            (DtypeKind::UInt, 4) => Scalar::UInt(B::read_u32(c) as u64),
            (DtypeKind::UInt, _) => Scalar::UInt(B::read_u64(c)),
            (DtypeKind::Float, 4) => Scalar::F32(B::read_f32(c)),
            (DtypeKind::Float, _) => Scalar::F64(B::read_f64(c)),
            (DtypeKind::Object, _) => unreachable!("object dtype has no raw payload"),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Numeric(Vec<Scalar>),
    Object(Vec<Value>),
}

/// An n-dimensional array with its elements in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub dtype: Dtype,
    pub data: ArrayData,
}

impl NdArray {
    /// What `_reconstruct` returns before `BUILD` fills it in.
    pub(crate) fn placeholder() -> Self {
        NdArray {
            shape: vec![0],
            dtype: Dtype::default(),
            data: ArrayData::Numeric(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Applies `ndarray.__setstate__` arguments: `([version,] shape, dtype, is_fortran, data)`.
    pub(crate) fn set_state(&mut self, state: Value) -> Result<(), ParseError> {
        let Value::Tuple(mut items) = state else {
            return Err(ParseError::InvalidPickle("array state is not a tuple".to_string()));
        };
        if items.len() == 5 {
            items.remove(0);
        }
        let [shape, dtype, is_fortran, data]: [Value; 4] = items.try_into().map_err(|_| {
            ParseError::InvalidPickle("array state has the wrong length".to_string())
        })?;

        let shape = shape_of(&shape)?;
        let Value::Dtype(dtype) = dtype else {
            return Err(ParseError::InvalidPickle("array state has no dtype".to_string()));
        };
        let fortran = match is_fortran {
            Value::Bool(v) => v,
            Value::Int(v) => v != 0,
            _ => {
                return Err(ParseError::InvalidPickle(
                    "array state has no order flag".to_string(),
                ))
            }
        };

        let data = if dtype.kind == DtypeKind::Object {
            let Value::List(items) = data else {
                return Err(ParseError::InvalidPickle(
                    "object array state holds no list".to_string(),
                ));
            };
            ArrayData::Object(items)
        } else {
            let bytes = data.into_bytes().ok_or_else(|| {
                ParseError::InvalidPickle("array state holds no byte payload".to_string())
            })?;
            ArrayData::Numeric(dtype.decode(&bytes)?)
        };

        *self = NdArray::new(shape, dtype, data, fortran)?;
        Ok(())
    }

    /// Arguments of `numeric._frombuffer`: `(buffer, dtype, shape, order)`.
    pub(crate) fn from_buffer(args: Vec<Value>) -> Result<Self, ParseError> {
        let [buffer, dtype, shape, order]: [Value; 4] = args.try_into().map_err(|_| {
            ParseError::InvalidPickle("_frombuffer takes four arguments".to_string())
        })?;
        let bytes = buffer
            .into_bytes()
            .ok_or_else(|| ParseError::InvalidPickle("_frombuffer without a buffer".to_string()))?;
        let Value::Dtype(dtype) = dtype else {
            return Err(ParseError::InvalidPickle("_frombuffer without a dtype".to_string()));
        };
        let shape = shape_of(&shape)?;
        let fortran = order.text().as_deref() == Some("F");

        let data = ArrayData::Numeric(dtype.decode(&bytes)?);
        NdArray::new(shape, dtype, data, fortran)
    }

    fn new(
        shape: Vec<usize>,
        dtype: Dtype,
        data: ArrayData,
        fortran: bool,
    ) -> Result<Self, ParseError> {
        let count: usize = shape.iter().product();
        let found = match &data {
            ArrayData::Numeric(values) => values.len(),
            ArrayData::Object(values) => values.len(),
        };
        if found != count {
            return Err(ParseError::InvalidPickle(format!(
                "array of shape {shape:?} holds {found} elements"
            )));
        }

        let data = if fortran && shape.len() > 1 {
            match data {
                ArrayData::Numeric(values) => ArrayData::Numeric(fortran_to_c(values, &shape)),
                ArrayData::Object(values) => ArrayData::Object(fortran_to_c(values, &shape)),
            }
        } else {
            data
        };

        Ok(NdArray { shape, dtype, data })
    }

    /// Same as NumPy's `item()`: the only element of a one-element array.
    pub fn item(self) -> Result<Value, ParseError> {
        let len = self.len();
        if len != 1 {
            return Err(ParseError::NotASingleRecord { len });
        }
        Ok(match self.data {
            ArrayData::Object(mut values) => values.remove(0),
            ArrayData::Numeric(values) => Value::Scalar(values[0]),
        })
    }
}

fn shape_of(value: &Value) -> Result<Vec<usize>, ParseError> {
    let dims = match value {
        Value::Tuple(dims) | Value::List(dims) => dims,
        Value::Int(n) => return usize::try_from(*n).map(|n| vec![n]).map_err(|_| bad_shape()),
        _ => return Err(bad_shape()),
    };
    dims.iter()
        .map(|dim| match dim {
            Value::Int(n) => usize::try_from(*n).map_err(|_| bad_shape()),
            _ => Err(bad_shape()),
        })
        .collect()
}

fn bad_shape() -> ParseError {
    ParseError::InvalidPickle("array shape is not a tuple of dimensions".to_string())
}

// Column-major to row-major for any number of dimensions.
fn fortran_to_c<T: Clone>(values: Vec<T>, shape: &[usize]) -> Vec<T> {
    let mut strides = vec![1usize; shape.len()];
    for axis in 1..shape.len() {
        strides[axis] = strides[axis - 1] * shape[axis - 1];
    }

    let mut index = vec![0usize; shape.len()];
    let mut reordered = Vec::with_capacity(values.len());
    for _ in 0..values.len() {
        let offset: usize = index.iter().zip(&strides).map(|(i, s)| i * s).sum();
        reordered.push(values[offset].clone());

        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    reordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_from_code() {
        let dtype = Dtype::from_code("f4").unwrap();
        assert_eq!(dtype.kind, DtypeKind::Float);
        assert_eq!(dtype.itemsize, 4);
        assert_eq!(dtype.endian, Endian::Little);

        assert_eq!(Dtype::from_code(">u2").unwrap().endian, Endian::Big);
        assert_eq!(Dtype::from_code("O8").unwrap().kind, DtypeKind::Object);
        assert!(matches!(
            Dtype::from_code("f2"),
            Err(ParseError::UnsupportedDtype(_))
        ));
        assert!(matches!(
            Dtype::from_code("U10"),
            Err(ParseError::UnsupportedDtype(_))
        ));
    }

    #[test]
    fn test_decode_both_byte_orders() {
        let mut dtype = Dtype::from_code("i2").unwrap();
        assert_eq!(
            dtype.decode(&[0x01, 0x00, 0xff, 0xff]).unwrap(),
            vec![Scalar::Int(1), Scalar::Int(-1)]
        );

        dtype.endian = Endian::Big;
        assert_eq!(
            dtype.decode(&[0x01, 0x00]).unwrap(),
            vec![Scalar::Int(256)]
        );

        let dtype = Dtype::from_code("f4").unwrap();
        assert_eq!(
            dtype.decode(&1.5f32.to_le_bytes()).unwrap(),
            vec![Scalar::F32(1.5)]
        );
        assert!(dtype.decode(&[0, 0, 0]).is_err());
    }

    #[test]
    fn test_set_state_applies_endian() {
        let mut dtype = Dtype::from_code("f8").unwrap();
        let state = Value::Tuple(vec![
            Value::Int(3),
            Value::Str(">".to_string()),
            Value::None,
            Value::None,
            Value::None,
            Value::Int(-1),
            Value::Int(-1),
            Value::Int(0),
        ]);
        dtype.set_state(state).unwrap();
        assert_eq!(dtype.endian, Endian::Big);
    }

    #[test]
    fn test_fortran_order_is_reordered() {
        // [[1, 2, 3], [4, 5, 6]] stored column by column.
        let bytes: Vec<u8> = [1u8, 4, 2, 5, 3, 6].to_vec();
        let dtype = Dtype::from_code("u1").unwrap();
        let mut array = NdArray::placeholder();
        array
            .set_state(Value::Tuple(vec![
                Value::Int(1),
                Value::Tuple(vec![Value::Int(2), Value::Int(3)]),
                Value::Dtype(dtype),
                Value::Bool(true),
                Value::Bytes(bytes),
            ]))
            .unwrap();

        let ArrayData::Numeric(values) = &array.data else {
            panic!("numeric array expected");
        };
        let values: Vec<u64> = values
            .iter()
            .map(|v| match v {
                Scalar::UInt(v) => *v,
                _ => panic!("unsigned value expected"),
            })
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_payload_size_must_match_shape() {
        let mut array = NdArray::placeholder();
        let result = array.set_state(Value::Tuple(vec![
            Value::Tuple(vec![Value::Int(2), Value::Int(3)]),
            Value::Dtype(Dtype::from_code("u1").unwrap()),
            Value::Bool(false),
            Value::Bytes(vec![0; 5]),
        ]));
        assert!(matches!(result, Err(ParseError::InvalidPickle(_))));
    }

    #[test]
    fn test_item() {
        let array = NdArray {
            shape: vec![],
            dtype: Dtype::from_code("O8").unwrap(),
            data: ArrayData::Object(vec![Value::Str("record".to_string())]),
        };
        assert_eq!(array.item().unwrap(), Value::Str("record".to_string()));

        let array = NdArray {
            shape: vec![2],
            dtype: Dtype::from_code("O8").unwrap(),
            data: ArrayData::Object(vec![Value::None, Value::None]),
        };
        assert!(matches!(
            array.item(),
            Err(ParseError::NotASingleRecord { len: 2 })
        ));
    }
}
