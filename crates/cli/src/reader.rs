//! S-expression reader for wire descriptions
//!
//! The surface is deliberately tiny: lists, integers, floats, strings,
//! booleans, keywords (`:looped`) and symbols. It exists to describe wire
//! graphs, not to be a language. Example:
//!
//! ```text
//! (schedule (wire "adder" (Const 3) (Math.Add 4) (Log)))
//! (run)
//! ```

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Form {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Nil,
    /// `:name` markers used for wire flags
    Keyword(String),
    Symbol(String),
    List(Vec<Form>),
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Form::Int(i) => write!(f, "{}", i),
            Form::Float(v) => write!(f, "{}", v),
            Form::Str(s) => write!(f, "{:?}", s),
            Form::Bool(b) => write!(f, "{}", b),
            Form::Nil => write!(f, "nil"),
            Form::Keyword(k) => write!(f, ":{}", k),
            Form::Symbol(s) => write!(f, "{}", s),
            Form::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadError {
    pub msg: String,
    pub position: usize,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "read error at {}: {}", self.position, self.msg)
    }
}

impl std::error::Error for ReadError {}

struct Reader<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn err(&self, msg: impl Into<String>) -> ReadError {
        ReadError {
            msg: msg.into(),
            position: self.pos,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\r' | b'\n' | b',' => {
                    self.pos += 1;
                }
                b';' => {
                    // Line comment
                    while let Some(b) = self.peek() {
                        self.pos += 1;
                        if b == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    fn read_form(&mut self) -> Result<Form, ReadError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.err("unexpected end of input")),
            Some(b'(') => self.read_list(),
            Some(b')') => Err(self.err("unbalanced ')'")),
            Some(b'"') => self.read_string(),
            Some(b':') => {
                self.pos += 1;
                let word = self.read_word();
                if word.is_empty() {
                    Err(self.err("empty keyword"))
                } else {
                    Ok(Form::Keyword(word))
                }
            }
            Some(_) => self.read_atom(),
        }
    }

    fn read_list(&mut self) -> Result<Form, ReadError> {
        self.bump(); // consumes '('
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(self.err("unterminated list")),
                Some(b')') => {
                    self.pos += 1;
                    return Ok(Form::List(items));
                }
                Some(_) => items.push(self.read_form()?),
            }
        }
    }

    fn read_string(&mut self) -> Result<Form, ReadError> {
        self.bump(); // consumes '"'
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.err("unterminated string")),
                Some(b'"') => return Ok(Form::Str(out)),
                Some(b'\\') => match self.bump() {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'"') => out.push('"'),
                    Some(b'\\') => out.push('\\'),
                    Some(other) => {
                        return Err(self.err(format!("unknown escape '\\{}'", other as char)));
                    }
                    None => return Err(self.err("unterminated escape")),
                },
                Some(b) => out.push(b as char),
            }
        }
    }

    fn read_word(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b'"' | b';' | b',') {
                break;
            }
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn read_atom(&mut self) -> Result<Form, ReadError> {
        let word = self.read_word();
        if word.is_empty() {
            return Err(self.err("empty atom"));
        }
        Ok(match word.as_str() {
            "true" => Form::Bool(true),
            "false" => Form::Bool(false),
            "nil" => Form::Nil,
            _ => {
                if let Ok(i) = word.parse::<i64>() {
                    Form::Int(i)
                } else if let Ok(f) = word.parse::<f64>() {
                    Form::Float(f)
                } else {
                    Form::Symbol(word)
                }
            }
        })
    }
}

/// Read one form from `src`. Trailing content is an error.
pub fn read_one(src: &str) -> Result<Form, ReadError> {
    let mut reader = Reader {
        src: src.as_bytes(),
        pos: 0,
    };
    let form = reader.read_form()?;
    reader.skip_ws();
    if reader.pos != reader.src.len() {
        return Err(reader.err("trailing content after form"));
    }
    Ok(form)
}

/// Read every form in `src` (a script file's worth).
pub fn read_all(src: &str) -> Result<Vec<Form>, ReadError> {
    let mut reader = Reader {
        src: src.as_bytes(),
        pos: 0,
    };
    let mut out = Vec::new();
    loop {
        reader.skip_ws();
        if reader.pos == reader.src.len() {
            return Ok(out);
        }
        out.push(reader.read_form()?);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atoms() {
        assert_eq!(read_one("42").unwrap(), Form::Int(42));
        assert_eq!(read_one("-7").unwrap(), Form::Int(-7));
        assert_eq!(read_one("2.5").unwrap(), Form::Float(2.5));
        assert_eq!(read_one("true").unwrap(), Form::Bool(true));
        assert_eq!(read_one("nil").unwrap(), Form::Nil);
        assert_eq!(read_one(":looped").unwrap(), Form::Keyword("looped".into()));
        assert_eq!(read_one("Math.Add").unwrap(), Form::Symbol("Math.Add".into()));
        assert_eq!(read_one("\"hi\\n\"").unwrap(), Form::Str("hi\n".into()));
    }

    #[test]
    fn test_lists_and_comments() {
        let form = read_one("(wire \"w\" :looped (Const 42) ; comment\n (Pass))").unwrap();
        match form {
            Form::List(items) => {
                assert_eq!(items.len(), 5);
                assert_eq!(items[0], Form::Symbol("wire".into()));
                assert_eq!(items[2], Form::Keyword("looped".into()));
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_read_all() {
        let forms = read_all("(a) (b 1) 3").unwrap();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[2], Form::Int(3));
    }

    #[test]
    fn test_errors() {
        assert!(read_one("(unclosed").is_err());
        assert!(read_one(")").is_err());
        assert!(read_one("\"open").is_err());
        assert!(read_one("(a) trailing").is_err());
        assert!(read_one("").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let src = "(wire \"w\" (Const 42) (Math.Add 4))";
        let form = read_one(src).unwrap();
        assert_eq!(read_one(&form.to_string()).unwrap(), form);
    }
}
