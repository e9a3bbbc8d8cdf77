use std::{iter::Peekable, str::Chars};

use byteorder::{ByteOrder as _, LittleEndian};

use crate::ParseError;

pub const MAGIC: &[u8; 6] = b"\x93NUMPY";

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub descr: String,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
}

impl Header {
    pub fn is_object(&self) -> bool {
        matches!(self.descr.as_str(), "|O" | "O" | "<O" | ">O" | "=O")
    }

    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// Reads the preamble and header of a `.npy` file. Returns the header and the
/// offset at which the array payload starts.
pub fn read_header(data: &[u8]) -> Result<(Header, usize), ParseError> {
    if data.len() < 8 || &data[..6] != MAGIC {
        return Err(ParseError::BadMagic);
    }

    let (major, minor) = (data[6], data[7]);
    let (header_len, start) = match major {
        1 if data.len() >= 10 => (LittleEndian::read_u16(&data[8..10]) as usize, 10),
        2 | 3 if data.len() >= 12 => (LittleEndian::read_u32(&data[8..12]) as usize, 12),
        1..=3 => return Err(ParseError::Truncated { offset: data.len() }),
        _ => return Err(ParseError::UnsupportedVersion { major, minor }),
    };

    let end = start + header_len;
    if data.len() < end {
        return Err(ParseError::Truncated { offset: data.len() });
    }
    let raw = &data[start..end];

    // 1.0 and 2.0 headers are latin-1, 3.0 switched to utf-8.
    let text = if major == 3 {
        std::str::from_utf8(raw)
            .map_err(|e| ParseError::InvalidHeader(e.to_string()))?
            .to_string()
    } else {
        raw.iter().map(|&b| b as char).collect()
    };

    Ok((parse_header(&text)?, end))
}

pub fn parse_header(text: &str) -> Result<Header, ParseError> {
    let mut parser = LiteralParser {
        chars: text.chars().peekable(),
    };
    let literal = parser.parse_value().map_err(ParseError::InvalidHeader)?;
    parser.skip_whitespace();
    if let Some(c) = parser.chars.peek() {
        return Err(ParseError::InvalidHeader(format!(
            "unexpected '{c}' after header dict"
        )));
    }

    let Literal::Dict(entries) = literal else {
        return Err(ParseError::InvalidHeader("header is not a dict".to_string()));
    };
    let lookup = |key: &str| {
        entries
            .iter()
            .find(|(k, _)| matches!(k, Literal::Str(s) if s == key))
            .map(|(_, v)| v)
            .ok_or_else(|| ParseError::InvalidHeader(format!("missing key '{key}'")))
    };

    let descr = match lookup("descr")? {
        Literal::Str(descr) => descr.clone(),
        _ => "<structured>".to_string(),
    };
    let fortran_order = match lookup("fortran_order")? {
        Literal::Bool(value) => *value,
        _ => {
            return Err(ParseError::InvalidHeader(
                "'fortran_order' is not a bool".to_string(),
            ))
        }
    };
    let shape = match lookup("shape")? {
        Literal::Tuple(dims) => dims
            .iter()
            .map(|dim| match dim {
                Literal::Int(n) if *n >= 0 => Ok(*n as usize),
                _ => Err(ParseError::InvalidHeader(
                    "'shape' holds a non-dimension".to_string(),
                )),
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => {
            return Err(ParseError::InvalidHeader(
                "'shape' is not a tuple".to_string(),
            ))
        }
    };

    Ok(Header {
        descr,
        fortran_order,
        shape,
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Int(i64),
    Bool(bool),
    None,
    Tuple(Vec<Literal>),
    List(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
}

// Just enough of Python's literal syntax for `.npy` headers.
struct LiteralParser<'a> {
    chars: Peekable<Chars<'a>>,
}

impl LiteralParser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn expect(&mut self, expected: char) -> Result<(), String> {
        self.skip_whitespace();
        match self.chars.next() {
            Some(c) if c == expected => Ok(()),
            Some(c) => Err(format!("expected '{expected}', found '{c}'")),
            None => Err(format!("expected '{expected}', found end of header")),
        }
    }

    fn parse_value(&mut self) -> Result<Literal, String> {
        self.skip_whitespace();
        match self.chars.peek().copied() {
            Some('{') => self.parse_dict(),
            Some('(') => {
                self.chars.next();
                Ok(Literal::Tuple(self.parse_items(')')?))
            }
            Some('[') => {
                self.chars.next();
                Ok(Literal::List(self.parse_items(']')?))
            }
            Some(quote @ ('\'' | '"')) => {
                self.chars.next();
                self.parse_string(quote)
            }
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.parse_int(),
            Some(c) if c.is_ascii_alphabetic() => self.parse_ident(),
            Some(c) => Err(format!("unexpected '{c}'")),
            None => Err("unexpected end of header".to_string()),
        }
    }

    fn parse_dict(&mut self) -> Result<Literal, String> {
        self.expect('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_whitespace();
            if self.chars.next_if_eq(&'}').is_some() {
                return Ok(Literal::Dict(entries));
            }
            let key = self.parse_value()?;
            self.expect(':')?;
            let value = self.parse_value()?;
            entries.push((key, value));

            self.skip_whitespace();
            match self.chars.next() {
                Some(',') => continue,
                Some('}') => return Ok(Literal::Dict(entries)),
                Some(c) => return Err(format!("unexpected '{c}' in dict")),
                None => return Err("unterminated dict".to_string()),
            }
        }
    }

    fn parse_items(&mut self, close: char) -> Result<Vec<Literal>, String> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.chars.next_if_eq(&close).is_some() {
                return Ok(items);
            }
            items.push(self.parse_value()?);

            self.skip_whitespace();
            match self.chars.next() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(items),
                Some(c) => return Err(format!("unexpected '{c}' in sequence")),
                None => return Err("unterminated sequence".to_string()),
            }
        }
    }

    fn parse_string(&mut self, quote: char) -> Result<Literal, String> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(Literal::Str(value)),
                Some('\\') => match self.chars.next() {
                    Some(escaped) => value.push(escaped),
                    None => return Err("unterminated string".to_string()),
                },
                Some(c) => value.push(c),
                None => return Err("unterminated string".to_string()),
            }
        }
    }

    fn parse_int(&mut self) -> Result<Literal, String> {
        let mut digits = String::new();
        if let Some(sign) = self.chars.next_if(|&c| c == '-' || c == '+') {
            digits.push(sign);
        }
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit()) {
            digits.push(c);
        }
        // Python 2 era headers wrote dimensions as `3L`.
        self.chars.next_if_eq(&'L');
        digits
            .parse()
            .map(Literal::Int)
            .map_err(|e| format!("invalid integer '{digits}': {e}"))
    }

    fn parse_ident(&mut self) -> Result<Literal, String> {
        let mut ident = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') {
            ident.push(c);
        }
        match ident.as_str() {
            "True" => Ok(Literal::Bool(true)),
            "False" => Ok(Literal::Bool(false)),
            "None" => Ok(Literal::None),
            _ => Err(format!("unknown name '{ident}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_preamble(major: u8, text: &str) -> Vec<u8> {
        let mut data = MAGIC.to_vec();
        data.extend_from_slice(&[major, 0]);
        if major == 1 {
            data.extend_from_slice(&(text.len() as u16).to_le_bytes());
        } else {
            data.extend_from_slice(&(text.len() as u32).to_le_bytes());
        }
        data.extend_from_slice(text.as_bytes());
        data
    }

    #[test]
    fn test_parse_object_header() {
        let header =
            parse_header("{'descr': '|O', 'fortran_order': False, 'shape': (), }    \n").unwrap();
        assert!(header.is_object());
        assert!(!header.fortran_order);
        assert!(header.shape.is_empty());
        assert_eq!(header.element_count(), 1);
    }

    #[test]
    fn test_parse_numeric_header() {
        let header =
            parse_header("{\"descr\": \"<f4\", \"fortran_order\": True, \"shape\": (5, 3)}")
                .unwrap();
        assert_eq!(header.descr, "<f4");
        assert!(header.fortran_order);
        assert_eq!(header.shape, vec![5, 3]);
        assert!(!header.is_object());
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        assert!(matches!(
            parse_header("{'descr': '|O', 'shape': ()}"),
            Err(ParseError::InvalidHeader(_))
        ));
        assert!(matches!(
            parse_header("['descr']"),
            Err(ParseError::InvalidHeader(_))
        ));
        assert!(matches!(
            parse_header("{'descr': '|O', 'fortran_order': False, 'shape': (-1,)}"),
            Err(ParseError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_structured_descr_is_kept_apart() {
        let header = parse_header(
            "{'descr': [('xyz', '<f4', (3,))], 'fortran_order': False, 'shape': (2,), }",
        )
        .unwrap();
        assert_eq!(header.descr, "<structured>");
        assert_eq!(header.shape, vec![2]);
    }

    #[test]
    fn test_read_header_versions() {
        let text = "{'descr': '|O', 'fortran_order': False, 'shape': (), }\n";
        for major in [1, 2, 3] {
            let data = with_preamble(major, text);
            let (header, offset) = read_header(&data).unwrap();
            assert!(header.is_object());
            assert_eq!(offset, data.len());
        }
    }

    #[test]
    fn test_read_header_errors() {
        assert!(matches!(
            read_header(b"PK\x03\x04 not numpy"),
            Err(ParseError::BadMagic)
        ));

        let mut data = with_preamble(1, "{}");
        data[6] = 9;
        assert!(matches!(
            read_header(&data),
            Err(ParseError::UnsupportedVersion { major: 9, minor: 0 })
        ));

        let data = with_preamble(1, "{'descr': '|O', 'fortran_order': False, 'shape': ()}");
        assert!(matches!(
            read_header(&data[..20]),
            Err(ParseError::Truncated { .. })
        ));
    }
}
