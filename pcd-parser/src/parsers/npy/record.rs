use pcd_core::pointcloud::{point::Color, scalar::Scalar};

use super::{
    array::{ArrayData, NdArray},
    pickle::Value,
};
use crate::ParseError;

/// The two parallel sequences of one sample, validated but not yet paired.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub positions: Vec<[Scalar; 3]>,
    pub colors: Vec<Color>,
}

impl TryFrom<Value> for SampleRecord {
    type Error = ParseError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Dict(entries) = value else {
            return Err(ParseError::NotAMapping);
        };

        let mut xyz = None;
        let mut rgb = None;
        for (key, value) in entries {
            match key.text().as_deref() {
                Some("xyz") => xyz = Some(value),
                Some("rgb") => rgb = Some(value),
                _ => {}
            }
        }
        let xyz = xyz.ok_or(ParseError::MissingField("xyz"))?;
        let rgb = rgb.ok_or(ParseError::MissingField("rgb"))?;

        let positions = rows("xyz", xyz)?
            .into_iter()
            .enumerate()
            .map(|(row, values)| match values.as_slice() {
                &[x, y, z] => Ok([x, y, z]),
                _ => Err(ParseError::Arity {
                    field: "xyz",
                    row,
                    expected: "3",
                    found: values.len(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        let colors = rows("rgb", rgb)?
            .into_iter()
            .enumerate()
            .map(|(row, values)| match values.as_slice() {
                &[r, g, b] => Ok(Color::rgb(r, g, b)),
                &[r, g, b, a] => Ok(Color::rgba(r, g, b, a)),
                _ => Err(ParseError::Arity {
                    field: "rgb",
                    row,
                    expected: "3 or 4",
                    found: values.len(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SampleRecord { positions, colors })
    }
}

// A field is a 2-D array, or any sequence whose items are rows.
fn rows(field: &'static str, value: Value) -> Result<Vec<Vec<Scalar>>, ParseError> {
    match value {
        Value::Array(array) if array.shape.len() == 2 => {
            let width = array.shape[1];
            let values = array_scalars(field, array)?;
            if width == 0 {
                return Ok(vec![Vec::new(); values.len()]);
            }
            Ok(values.chunks(width).map(<[Scalar]>::to_vec).collect())
        }
        Value::Array(NdArray {
            shape,
            data: ArrayData::Object(items),
            ..
        }) if shape.len() == 1 => items.into_iter().map(|item| row(field, item)).collect(),
        Value::Array(array) => Err(ParseError::InvalidField {
            field,
            reason: format!("expected a 2-D array, found shape {:?}", array.shape),
        }),
        Value::List(items) | Value::Tuple(items) => {
            items.into_iter().map(|item| row(field, item)).collect()
        }
        other => Err(ParseError::InvalidField {
            field,
            reason: format!("expected an array, found {other:?}"),
        }),
    }
}

fn row(field: &'static str, value: Value) -> Result<Vec<Scalar>, ParseError> {
    match value {
        Value::Array(array) if array.shape.len() == 1 => array_scalars(field, array),
        Value::List(items) | Value::Tuple(items) => {
            items.iter().map(|item| scalar(field, item)).collect()
        }
        other => Err(ParseError::InvalidField {
            field,
            reason: format!("row is not a sequence: {other:?}"),
        }),
    }
}

fn array_scalars(field: &'static str, array: NdArray) -> Result<Vec<Scalar>, ParseError> {
    match array.data {
        ArrayData::Numeric(values) => Ok(values),
        ArrayData::Object(items) => items.iter().map(|item| scalar(field, item)).collect(),
    }
}

fn scalar(field: &'static str, value: &Value) -> Result<Scalar, ParseError> {
    value.as_scalar().ok_or_else(|| ParseError::InvalidField {
        field,
        reason: format!("not a number: {value:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::npy::array::Dtype;

    fn array_f4(rows: &[&[f32]]) -> Value {
        let width = rows.first().map_or(0, |r| r.len());
        let bytes: Vec<u8> = rows
            .iter()
            .flat_map(|r| r.iter())
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut array = NdArray::placeholder();
        array
            .set_state(Value::Tuple(vec![
                Value::Tuple(vec![Value::Int(rows.len() as i64), Value::Int(width as i64)]),
                Value::Dtype(Dtype::from_code("f4").unwrap()),
                Value::Bool(false),
                Value::Bytes(bytes),
            ]))
            .unwrap();
        Value::Array(array)
    }

    fn record(xyz: Value, rgb: Value) -> Value {
        Value::Dict(vec![
            (Value::Str("xyz".to_string()), xyz),
            (Value::Str("rgb".to_string()), rgb),
        ])
    }

    #[test]
    fn test_arrays() {
        let value = record(
            array_f4(&[&[0.0, 1.0, 2.0], &[3.0, 4.0, 5.0]]),
            array_f4(&[&[0.1, 0.2, 0.3, 1.0], &[0.4, 0.5, 0.6, 1.0]]),
        );
        let record = SampleRecord::try_from(value).unwrap();

        assert_eq!(record.positions.len(), 2);
        assert_eq!(record.positions[1][2], Scalar::F32(5.0));
        assert_eq!(record.colors[0].r, Scalar::F32(0.1));
        assert_eq!(record.colors[0].a, Some(Scalar::F32(1.0)));
    }

    #[test]
    fn test_nested_lists() {
        let value = record(
            Value::List(vec![Value::Tuple(vec![
                Value::Float(1.5),
                Value::Int(2),
                Value::Float(-3.0),
            ])]),
            Value::List(vec![Value::List(vec![
                Value::Int(255),
                Value::Int(0),
                Value::Int(128),
            ])]),
        );
        let record = SampleRecord::try_from(value).unwrap();

        assert_eq!(
            record.positions,
            vec![[Scalar::F64(1.5), Scalar::Int(2), Scalar::F64(-3.0)]]
        );
        assert_eq!(record.colors[0].b, Scalar::Int(128));
        assert_eq!(record.colors[0].a, None);
    }

    #[test]
    fn test_missing_fields() {
        let value = Value::Dict(vec![(
            Value::Str("xyz".to_string()),
            array_f4(&[&[0.0, 0.0, 0.0]]),
        )]);
        assert!(matches!(
            SampleRecord::try_from(value),
            Err(ParseError::MissingField("rgb"))
        ));
        assert!(matches!(
            SampleRecord::try_from(Value::List(vec![])),
            Err(ParseError::NotAMapping)
        ));
    }

    #[test]
    fn test_arity_is_checked() {
        let value = record(
            array_f4(&[&[0.0, 1.0]]),
            array_f4(&[&[0.0, 0.0, 0.0]]),
        );
        assert!(matches!(
            SampleRecord::try_from(value),
            Err(ParseError::Arity {
                field: "xyz",
                row: 0,
                found: 2,
                ..
            })
        ));

        let value = record(
            array_f4(&[&[0.0, 1.0, 2.0]]),
            array_f4(&[&[0.0, 0.0, 0.0, 0.0, 0.0]]),
        );
        assert!(matches!(
            SampleRecord::try_from(value),
            Err(ParseError::Arity {
                field: "rgb",
                found: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_flat_array_is_rejected() {
        let mut flat = NdArray::placeholder();
        flat.set_state(Value::Tuple(vec![
            Value::Tuple(vec![Value::Int(3)]),
            Value::Dtype(Dtype::from_code("u1").unwrap()),
            Value::Bool(false),
            Value::Bytes(vec![1, 2, 3]),
        ]))
        .unwrap();
        let value = record(Value::Array(flat), array_f4(&[&[0.0, 0.0, 0.0]]));
        assert!(matches!(
            SampleRecord::try_from(value),
            Err(ParseError::InvalidField { field: "xyz", .. })
        ));
    }
}
