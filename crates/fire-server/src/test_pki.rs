//! Throwaway CA and `localhost` server certificate for tests.

use std::{path::Path, sync::Arc};

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::{pki_types::CertificateDer, ClientConfig, RootCertStore};

use crate::certs::{CertificateFiles, CA_CERT_FILE, SERVER_CERT_FILE, SERVER_KEY_FILE};
use crate::server::tls::{install_crypto_provider, PemInputs};

pub struct TestPki {
    pub ca_cert_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    pub ca_cert_der: CertificateDer<'static>,
    pub server_cert_der: CertificateDer<'static>,
}

impl TestPki {
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "fire-server test CA");
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let server_key = KeyPair::generate().unwrap();
        let mut server_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        server_params
            .distinguished_name
            .push(DnType::CommonName, "localhost");
        let server = server_params.signed_by(&server_key, &ca, &ca_key).unwrap();

        Self {
            ca_cert_pem: ca.pem(),
            server_cert_pem: server.pem(),
            server_key_pem: server_key.serialize_pem(),
            ca_cert_der: ca.der().clone(),
            server_cert_der: server.der().clone(),
        }
    }

    pub fn pem_inputs(&self) -> PemInputs<'_> {
        PemInputs {
            ca_cert: self.ca_cert_pem.as_bytes(),
            server_cert: self.server_cert_pem.as_bytes(),
            server_key: self.server_key_pem.as_bytes(),
        }
    }

    /// Write the PEM files under their fixed names in `dir`.
    pub fn write_to(&self, dir: &Path) -> CertificateFiles {
        std::fs::write(dir.join(CA_CERT_FILE), &self.ca_cert_pem).unwrap();
        std::fs::write(dir.join(SERVER_CERT_FILE), &self.server_cert_pem).unwrap();
        std::fs::write(dir.join(SERVER_KEY_FILE), &self.server_key_pem).unwrap();
        CertificateFiles::in_dir(dir)
    }

    /// Client configuration trusting only the test CA.
    pub fn client_config(&self, alpn: &[&[u8]]) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca_cert_der.clone()).unwrap();
        let mut config = ClientConfig::builder_with_provider(install_crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
        Arc::new(config)
    }
}
