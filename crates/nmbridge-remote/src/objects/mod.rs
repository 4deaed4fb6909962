//! Typed views over remote CAdESCOM objects.
//!
//! Each view wraps a [`Handle`] and exposes only the operations that make
//! sense for that object kind.

pub use about::{check_plugin_version, csp_version, plugin_version, About, Version, VersionTriple};
pub use certificate::{Certificate, CertificateExport, PrivateKeyExport, ValidityExport};
pub use certificates::{Certificates, FindType};
pub use private_key::PrivateKey;
pub use store::{OpenMode, Store, StoreLocation, MY_STORE};

use crate::proxy::Handle;

/// A typed view over one remote object.
pub trait RemoteObject {
    fn from_handle(handle: Handle) -> Self;

    fn handle(&self) -> &Handle;

    fn id(&self) -> u32 {
        self.handle().id()
    }
}

macro_rules! remote_object {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            handle: $crate::proxy::Handle,
        }

        impl $crate::objects::RemoteObject for $name {
            fn from_handle(handle: $crate::proxy::Handle) -> Self {
                Self { handle }
            }

            fn handle(&self) -> &$crate::proxy::Handle {
                &self.handle
            }
        }
    };
}

pub(crate) use remote_object;

mod about;
mod certificate;
mod certificates;
mod private_key;
mod store;
