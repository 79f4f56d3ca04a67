use std::fmt;

/// The approval state of a CertificateRequest.
///
/// `Approved` and `Denied` are terminal: once either is recorded it is never
/// changed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    Undecided,
    Approved,
    Denied,
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Undecided)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undecided => "Undecided".fmt(f),
            Self::Approved => "Approved".fmt(f),
            Self::Denied => "Denied".fmt(f),
        }
    }
}
