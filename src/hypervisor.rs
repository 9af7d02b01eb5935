//! Domain lookup against the hypervisor management endpoint.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::STATE_POLL_INTERVAL;
use crate::error::RecordError;
use crate::progress::Console;
use crate::virsh::{Virsh, VirshError};

/// A user-supplied machine identifier, typed by its syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainId {
    Id(u32),
    Uuid(Uuid),
    Name(String),
}

impl DomainId {
    /// Digits are a numeric id, UUID syntax is a UUID, anything else a name.
    pub fn parse(key: &str) -> Self {
        if let Ok(id) = key.parse::<u32>() {
            return DomainId::Id(id);
        }
        if let Ok(uuid) = Uuid::parse_str(key) {
            return DomainId::Uuid(uuid);
        }
        DomainId::Name(key.to_string())
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainId::Id(id) => write!(f, "{id}"),
            DomainId::Uuid(uuid) => write!(f, "{uuid}"),
            DomainId::Name(name) => f.write_str(name),
        }
    }
}

/// A resolved domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainState {
    Running,
    Paused,
    ShutOff,
    Other(String),
}

impl DomainState {
    pub fn from_virsh(s: &str) -> Self {
        match s.trim() {
            "running" => DomainState::Running,
            "paused" => DomainState::Paused,
            "shut off" => DomainState::ShutOff,
            other => DomainState::Other(other.to_string()),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait Hypervisor {
    async fn lookup_by_id(&self, id: u32) -> Result<Domain, RecordError>;
    async fn lookup_by_uuid(&self, uuid: &Uuid) -> Result<Domain, RecordError>;
    async fn lookup_by_name(&self, name: &str) -> Result<Domain, RecordError>;
    async fn domain_state(&self, domain: &Domain) -> Result<DomainState, RecordError>;
}

/// Resolve `key` with the lookup strategy its syntax selects.
pub async fn resolve_target<H: Hypervisor>(hv: &H, key: &str) -> Result<Domain, RecordError> {
    let id = DomainId::parse(key);
    debug!(?id, "resolving domain");
    let domain = match &id {
        DomainId::Id(n) => hv.lookup_by_id(*n).await?,
        DomainId::Uuid(uuid) => hv.lookup_by_uuid(uuid).await?,
        DomainId::Name(name) => hv.lookup_by_name(name).await?,
    };
    info!("Using domain \"{}\" ({})", domain.name, domain.uuid);
    Ok(domain)
}

/// Poll until the domain runs. Returns `false` if cancelled first.
pub async fn wait_until_running<H: Hypervisor>(
    hv: &H,
    domain: &Domain,
    console: &Console,
    cancel: &CancellationToken,
) -> Result<bool, RecordError> {
    let mut announced = false;
    loop {
        let state = hv.domain_state(domain).await?;
        if state == DomainState::Running {
            return Ok(true);
        }
        if !announced {
            console.line("Waiting for domain to enter state running");
            debug!(?state, "domain not running yet");
            announced = true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep(STATE_POLL_INTERVAL) => {}
        }
    }
}

/// [`Hypervisor`] backed by the `virsh` client.
#[derive(Debug, Clone)]
pub struct VirshHypervisor {
    virsh: Virsh,
}

impl VirshHypervisor {
    /// Open (and verify) the connection named by `uri`, or libvirt's default.
    pub async fn connect(uri: Option<String>) -> Result<Self, RecordError> {
        let virsh = Virsh::new(uri);
        info!("Opening connection to {}", virsh.uri().unwrap_or("default hypervisor"));
        let canonical = virsh
            .run(["uri"])
            .await
            .map_err(|e| RecordError::Connection(e.to_string()))?;
        debug!(%canonical, "connected");
        Ok(Self { virsh })
    }

    pub fn virsh(&self) -> &Virsh {
        &self.virsh
    }

    async fn uuid_of(&self, name: &str) -> Result<Uuid, RecordError> {
        let out = self
            .virsh
            .run(["domuuid", name])
            .await
            .map_err(|e| lookup_error(e, name))?;
        Uuid::parse_str(&out)
            .map_err(|e| RecordError::Connection(format!("unexpected domuuid output {out:?}: {e}")))
    }

    async fn name_of(&self, key: &str) -> Result<String, RecordError> {
        self.virsh
            .run(["domname", key])
            .await
            .map_err(|e| lookup_error(e, key))
    }
}

fn lookup_error(e: VirshError, key: &str) -> RecordError {
    if e.is_no_domain() {
        RecordError::NotFound(format!("no domain matching '{key}'"))
    } else if e.is_connection() {
        RecordError::Connection(e.to_string())
    } else {
        RecordError::Connection(format!("looking up '{key}': {e}"))
    }
}

impl Hypervisor for VirshHypervisor {
    async fn lookup_by_id(&self, id: u32) -> Result<Domain, RecordError> {
        let name = self.name_of(&id.to_string()).await?;
        let uuid = self.uuid_of(&name).await?;
        Ok(Domain { name, uuid })
    }

    async fn lookup_by_uuid(&self, uuid: &Uuid) -> Result<Domain, RecordError> {
        let name = self.name_of(&uuid.to_string()).await?;
        Ok(Domain { name, uuid: *uuid })
    }

    async fn lookup_by_name(&self, name: &str) -> Result<Domain, RecordError> {
        let uuid = self.uuid_of(name).await?;
        Ok(Domain {
            name: name.to_string(),
            uuid,
        })
    }

    async fn domain_state(&self, domain: &Domain) -> Result<DomainState, RecordError> {
        let out = self
            .virsh
            .run(["domstate", &domain.name])
            .await
            .map_err(|e| lookup_error(e, &domain.name))?;
        Ok(DomainState::from_virsh(&out))
    }
}
