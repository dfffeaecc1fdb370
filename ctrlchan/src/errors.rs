#[derive(Debug)]
pub enum Errors {
    InvalidMagic([u8; 4]),
    FrameTooLarge(u32),
    UnknownMessageType(u64),
    MissingField(&'static str),
}

#[derive(Debug)]
pub enum ErrorType {
    IOError(std::io::Error),
    CborError(serde_cbor::Error),
    ChanError(Errors),
}

impl From<std::io::Error> for ErrorType {
    fn from(e: std::io::Error) -> Self {
        ErrorType::IOError(e)
    }
}

impl From<serde_cbor::Error> for ErrorType {
    fn from(e: serde_cbor::Error) -> Self {
        ErrorType::CborError(e)
    }
}

impl From<Errors> for ErrorType {
    fn from(e: Errors) -> Self {
        ErrorType::ChanError(e)
    }
}
