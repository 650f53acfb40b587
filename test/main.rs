// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT


use anyhow::Result;
use misfit::{
    config::{Manifest, Step},
    install::InstallOptions,
    path::{ManifestLocation, MANIFEST_DIR_NAME, MANIFEST_FILE_NAME},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Bundle laid out on disk the way a build leaves it.
pub(crate) struct BundleFixture {
    root: PathBuf,
    manifest: Manifest,
}

impl BundleFixture {
    pub(crate) fn new(root: impl AsRef<Path>, app_name: &str) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        fs::create_dir_all(root.join("payloads"))?;

        let manifest = Manifest {
            app_name: app_name.into(),
            version: "1.0.0".into(),
            payload_dir: "payloads".into(),
            ..Default::default()
        };

        Ok(Self { root, manifest })
    }

    pub(crate) fn with_payload(self, rel: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<Self> {
        let path = self.root.join("payloads").join(rel.as_ref());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)?;

        Ok(self)
    }

    pub(crate) fn with_step(mut self, step: impl Into<Step>) -> Self {
        self.manifest.steps.push(step.into());
        self
    }

    pub(crate) fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Write manifest into bundle and return its location.
    pub(crate) fn write(&self) -> Result<ManifestLocation> {
        let path = self.root.join(MANIFEST_DIR_NAME).join(MANIFEST_FILE_NAME);
        self.manifest.save(&path)?;

        Ok(ManifestLocation::from_manifest_path(path))
    }

    /// Install options rooted at given target directory.
    pub(crate) fn options(&self, target: impl AsRef<Path>, backups: impl AsRef<Path>) -> Result<InstallOptions> {
        Ok(InstallOptions {
            install_root: std::path::absolute(target.as_ref())?,
            payload_root: self.manifest.payload_root(&self.root)?,
            command_dir: self.root.clone(),
            backups_root: std::path::absolute(backups.as_ref())?,
        })
    }
}
