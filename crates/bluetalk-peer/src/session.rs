use bluetalk_link::{Link, LinkCentral, LinkPeripheral};

/// The one live session, tagged by the role this peer ended up with.
/// Installed and cleared only by the discovery task.
#[derive(Clone)]
pub enum ActiveSession {
    Central { link: LinkCentral, addr: String },
    Peripheral { link: LinkPeripheral, addr: String },
}

impl ActiveSession {
    pub fn link(&self) -> &dyn Link {
        match self {
            ActiveSession::Central { link, .. } => link,
            ActiveSession::Peripheral { link, .. } => link,
        }
    }

    pub fn addr(&self) -> &str {
        match self {
            ActiveSession::Central { addr, .. } | ActiveSession::Peripheral { addr, .. } => addr,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            ActiveSession::Central { .. } => "Central",
            ActiveSession::Peripheral { .. } => "Peripheral",
        }
    }
}
