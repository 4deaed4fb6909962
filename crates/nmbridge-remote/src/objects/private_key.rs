use super::remote_object;
use crate::error::Result;

remote_object!(
    /// The private key bound to a certificate.
    PrivateKey
);

impl PrivateKey {
    pub fn provider_name(&self) -> Result<String> {
        self.handle.get_property("ProviderName")
    }

    pub fn provider_type(&self) -> Result<i32> {
        self.handle.get_property("ProviderType")
    }

    pub fn container_name(&self) -> Result<String> {
        self.handle.get_property("ContainerName")
    }

    pub fn unique_container_name(&self) -> Result<String> {
        self.handle.get_property("UniqueContainerName")
    }
}
