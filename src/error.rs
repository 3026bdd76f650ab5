use std::fmt;

#[derive(Debug)]
pub enum CarlinkError {
    Database(String),
    Car(String),
    Cid(String),
    Io(std::io::Error),
    Config(String),
    Other(String),
}

impl fmt::Display for CarlinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CarlinkError::Database(e) => write!(f, "Database error: {}", e),
            CarlinkError::Car(e) => write!(f, "CAR error: {}", e),
            CarlinkError::Cid(e) => write!(f, "CID error: {}", e),
            CarlinkError::Io(e) => write!(f, "IO error: {}", e),
            CarlinkError::Config(e) => write!(f, "Config error: {}", e),
            CarlinkError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for CarlinkError {}

impl From<std::io::Error> for CarlinkError {
    fn from(err: std::io::Error) -> Self {
        CarlinkError::Io(err)
    }
}

impl From<postgres::Error> for CarlinkError {
    fn from(err: postgres::Error) -> Self {
        CarlinkError::Database(err.to_string())
    }
}

impl From<cid::Error> for CarlinkError {
    fn from(err: cid::Error) -> Self {
        CarlinkError::Cid(err.to_string())
    }
}

impl From<String> for CarlinkError {
    fn from(err: String) -> Self {
        CarlinkError::Other(err)
    }
}

impl From<&str> for CarlinkError {
    fn from(err: &str) -> Self {
        CarlinkError::Other(err.to_string())
    }
}
