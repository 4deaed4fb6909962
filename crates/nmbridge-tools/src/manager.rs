//! Certificate and key container administration through certmgr/csptest.

use std::path::{Path, PathBuf};

use nmbridge_config::ToolsSection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, ToolError};
use crate::runner::{Tool, ToolExec, ToolOutput, ToolRunner};
use crate::scrape::{
    container_line, find_container, last_thumbprint, parse_container_list, EXISTS_CODE,
    NOT_EXPORTABLE_CODE, SUCCESS_MARKER,
};

/// A key container as csptest lists it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub container_name: String,
    pub unique_container_name: String,
}

/// Outcome of a PFX installation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallPfxResult {
    pub container: Option<Container>,
    pub thumbprint: String,
    pub output: String,
    pub ok: bool,
}

const ENUM_CONTAINERS: [&str; 5] = ["-keyset", "-enum_cont", "-verifycontext", "-fqcn", "-un"];

fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items.into_iter().map(|item| item.as_ref().to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// High-level operations over the two administration tools.
pub struct CertManager<E = ToolRunner> {
    exec: E,
}

impl CertManager<ToolRunner> {
    /// Manager over the executables named in `[tools]`.
    pub fn from_config(section: &ToolsSection) -> Self {
        Self::new(ToolRunner::from(section))
    }
}

impl<E: ToolExec> CertManager<E> {
    pub fn new(exec: E) -> Self {
        Self { exec }
    }

    /// Run a tool, turning a non-zero exit into `ToolError::Failed`.
    fn run(&self, tool: Tool, args: &[String]) -> Result<ToolOutput> {
        let output = self.exec.run(tool, args)?;
        if output.success {
            return Ok(output);
        }

        debug!(tool = tool.name(), code = ?output.code, output = %output.text, "tool failed");
        Err(ToolError::Failed {
            tool: tool.name(),
            code: output.code,
            output: output.text,
        })
    }

    /// Install a PFX bundle, reporting the thumbprint and container it created.
    pub fn install_pfx(
        &self,
        path: &Path,
        password: Option<&str>,
        exportable: bool,
    ) -> Result<InstallPfxResult> {
        let mut argv = args(["-inst", "-pfx", "-file"]);
        argv.push(path_arg(path));
        argv.push("-silent".to_string());
        if let Some(password) = password.filter(|password| !password.is_empty()) {
            argv.extend(args(["-pin", password]));
        }
        if exportable {
            argv.push("-keep_exportable".to_string());
        }

        let output = self.run(Tool::CertMgr, &argv)?;
        let mut result = InstallPfxResult {
            output: output.text.clone(),
            ..InstallPfxResult::default()
        };

        if let Some(thumbprint) = last_thumbprint(&output.text) {
            result.thumbprint = thumbprint;
            result.ok = true;
        }

        if let Some(name) = container_line(&output.text) {
            result.container = Some(match self.get_container(&name) {
                Ok(container) => container,
                Err(err) => {
                    debug!(container = %name, error = %err, "installed container not listed");
                    Container {
                        container_name: name.clone(),
                        unique_container_name: name,
                    }
                }
            });
        }

        Ok(result)
    }

    /// Bind an installed certificate to an existing key container.
    pub fn link_cert_with_container(&self, cert_path: &Path, container_name: &str) -> Result<bool> {
        let mut argv = args(["-inst", "-inst_to_cont", "-file"]);
        argv.push(path_arg(cert_path));
        argv.extend(args(["-cont", container_name, "-silent"]));

        let output = self.run(Tool::CertMgr, &argv)?;
        Ok(output.contains(SUCCESS_MARKER))
    }

    pub fn delete_certificate(&self, thumbprint: &str) -> Result<bool> {
        let thumbprint = thumbprint.to_lowercase();
        let output = self.run(
            Tool::CertMgr,
            &args(["-delete", "-certificate", "-thumbprint", thumbprint.as_str()]),
        )?;

        let deleted = output.contains(SUCCESS_MARKER);
        if deleted {
            debug!(%thumbprint, "certificate deleted");
        }
        Ok(deleted)
    }

    pub fn delete_container(&self, container: &Container) -> Result<bool> {
        let output = self.run(
            Tool::CertMgr,
            &args([
                "-delete",
                "-container",
                container.unique_container_name.as_str(),
            ]),
        )?;

        let deleted = output.contains(SUCCESS_MARKER);
        if deleted {
            debug!(container = %container.container_name, "container deleted");
        }
        Ok(deleted)
    }

    pub fn certificate_exists(&self, thumbprint: &str, store: Option<&str>) -> Result<bool> {
        let mut argv = args(["-list", "-thumbprint", thumbprint]);
        if let Some(store) = store.filter(|store| !store.is_empty()) {
            argv.extend(args(["-store", store]));
        }

        let output = self.run(Tool::CertMgr, &argv)?;
        Ok(output.contains(SUCCESS_MARKER))
    }

    pub fn list_containers(&self) -> Result<Vec<Container>> {
        let output = self.run(Tool::CspTest, &args(ENUM_CONTAINERS))?;
        Ok(parse_container_list(&output.text))
    }

    /// The first listed container whose line contains `part`.
    pub fn get_container(&self, part: &str) -> Result<Container> {
        let output = self.run(Tool::CspTest, &args(ENUM_CONTAINERS))?;
        find_container(&output.text, part)?
            .ok_or_else(|| ToolError::ContainerNotFound(part.to_string()))
    }

    /// Copy a container to `new_location`, returning the copy as listed.
    ///
    /// An existing destination is `ContainerExists` carrying that container.
    pub fn copy_container(&self, container: &Container, new_location: &str) -> Result<Container> {
        let argv = args([
            "-keycopy",
            "-contsrc",
            container.unique_container_name.as_str(),
            "-contdest",
            new_location,
            "-silent",
        ]);

        let exists = match self.run(Tool::CspTest, &argv) {
            Ok(_) => false,
            Err(err) => {
                let output = err.output().unwrap_or_default();
                if output.contains(NOT_EXPORTABLE_CODE) {
                    return Err(ToolError::ContainerNotExportable);
                }
                if !output.contains(EXISTS_CODE) {
                    return Err(err);
                }
                debug!(location = new_location, "container exists");
                true
            }
        };

        let copied = self.get_container(new_location)?;
        if exists {
            return Err(ToolError::ContainerExists { container: copied });
        }
        Ok(copied)
    }

    /// Rename by copying into the same storage under `new_name` and then
    /// deleting the original.
    pub fn rename_container(&self, container: &Container, new_name: &str) -> Result<Container> {
        let storage = container.container_name.replace(r"\\.\", "");
        let storage = storage.split('\\').next().unwrap_or_default();
        let location = format!(r"\\.\{storage}\{new_name}");

        if location == container.container_name || location == container.unique_container_name {
            debug!(%location, "container already has the requested name");
            return Ok(container.clone());
        }

        let renamed = match self.copy_container(container, &location) {
            Ok(renamed) => renamed,
            Err(ToolError::ContainerExists { .. }) => return Ok(container.clone()),
            Err(err) => {
                debug!(from = %container.container_name, to = %location, "container copy failed");
                return Err(err);
            }
        };

        if renamed.container_name == container.container_name
            || renamed.unique_container_name == container.unique_container_name
        {
            return Ok(container.clone());
        }

        if let Err(err) = self.delete_container(container) {
            warn!(container = %container.container_name, error = %err, "failed to delete renamed container");
        }
        Ok(renamed)
    }

    pub fn export_container_to_pfx(
        &self,
        file_path: &Path,
        container_name: &str,
        password: Option<&str>,
    ) -> Result<PathBuf> {
        let mut argv = args(["-export", "-container", container_name, "-pfx", "-dest"]);
        argv.push(path_arg(file_path));
        if let Some(password) = password.filter(|password| !password.is_empty()) {
            argv.extend(args(["-pin", password]));
        }

        match self.run(Tool::CertMgr, &argv) {
            Ok(_) => Ok(file_path.to_path_buf()),
            Err(err) if err.output().is_some_and(|out| out.contains(NOT_EXPORTABLE_CODE)) => {
                Err(ToolError::ContainerNotExportable)
            }
            Err(err) => Err(err),
        }
    }

    pub fn install_certificate(
        &self,
        file_path: &Path,
        store: Option<&str>,
        auto_dist: bool,
    ) -> Result<()> {
        let mut argv = args(["-inst", "-file"]);
        argv.push(path_arg(file_path));
        if let Some(store) = store.filter(|store| !store.is_empty()) {
            argv.extend(args(["-store", store]));
        }
        if auto_dist {
            argv.push("-autodist".to_string());
        }

        self.run(Tool::CertMgr, &argv)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    const LISTING: &str = "\
\\\\.\\HDIMAGE\\alice|\\\\.\\HDIMAGE\\HDIMAGE\\\\alice.000\\1A2B
\\\\.\\HDIMAGE\\alice-renamed|\\\\.\\HDIMAGE\\HDIMAGE\\\\alice-re.000\\3C4D
[ErrorCode: 0x00000000]
";

    #[derive(Default)]
    struct MockExec {
        calls: RefCell<Vec<(Tool, Vec<String>)>>,
        replies: RefCell<VecDeque<ToolOutput>>,
    }

    impl MockExec {
        fn with(replies: Vec<(bool, &str)>) -> Self {
            let mock = Self::default();
            for (success, text) in replies {
                mock.replies.borrow_mut().push_back(ToolOutput {
                    text: text.to_string(),
                    success,
                    code: Some(if success { 0 } else { 1 }),
                });
            }
            mock
        }
    }

    impl ToolExec for &MockExec {
        fn run(&self, tool: Tool, args: &[String]) -> Result<ToolOutput> {
            self.calls.borrow_mut().push((tool, args.to_vec()));
            Ok(self
                .replies
                .borrow_mut()
                .pop_front()
                .expect("unexpected tool invocation"))
        }
    }

    fn alice() -> Container {
        Container {
            container_name: "\\\\.\\HDIMAGE\\alice".to_string(),
            unique_container_name: "\\\\.\\HDIMAGE\\HDIMAGE\\\\alice.000\\1A2B".to_string(),
        }
    }

    #[test]
    fn install_pfx_builds_args_and_scrapes_output() {
        let install = "SHA1 Hash           : 0123456789abcdef0123456789abcdef01234567\n\
Container           : alice.000\n[ErrorCode: 0x00000000]\n";
        let mock = MockExec::with(vec![(true, install), (true, LISTING)]);
        let manager = CertManager::new(&mock);

        let result = manager
            .install_pfx(Path::new("/tmp/alice.pfx"), Some("1234"), true)
            .unwrap();

        assert!(result.ok);
        assert_eq!(result.thumbprint, "0123456789abcdef0123456789abcdef01234567");
        assert_eq!(result.container, Some(alice()));
        let calls = mock.calls.borrow();
        assert_eq!(
            calls[0],
            (
                Tool::CertMgr,
                args([
                    "-inst",
                    "-pfx",
                    "-file",
                    "/tmp/alice.pfx",
                    "-silent",
                    "-pin",
                    "1234",
                    "-keep_exportable"
                ])
            )
        );
        assert_eq!(calls[1], (Tool::CspTest, args(ENUM_CONTAINERS)));
    }

    #[test]
    fn install_pfx_falls_back_to_reported_container_name() {
        let install = "Container           : ghost.000\n[ErrorCode: 0x00000000]\n";
        let mock = MockExec::with(vec![(true, install), (true, LISTING)]);
        let result = CertManager::new(&mock)
            .install_pfx(Path::new("a.pfx"), None, false)
            .unwrap();

        assert!(!result.ok);
        assert_eq!(
            result.container,
            Some(Container {
                container_name: "ghost.000".to_string(),
                unique_container_name: "ghost.000".to_string(),
            })
        );
        assert_eq!(mock.calls.borrow()[0].1, args(["-inst", "-pfx", "-file", "a.pfx", "-silent"]));
    }

    #[test]
    fn failed_tool_run_is_error_with_output() {
        let mock = MockExec::with(vec![(false, "[ErrorCode: 0x80092004]")]);
        let err = CertManager::new(&mock).delete_certificate("ABCDEF").unwrap_err();

        assert_eq!(err.output(), Some("[ErrorCode: 0x80092004]"));
        assert_eq!(
            mock.calls.borrow()[0].1,
            args(["-delete", "-certificate", "-thumbprint", "abcdef"])
        );
    }

    #[test]
    fn success_marker_decides_boolean_results() {
        let mock = MockExec::with(vec![
            (true, "[ErrorCode: 0x00000000]"),
            (true, "nothing found"),
            (true, "[ErrorCode: 0x00000000]"),
        ]);
        let manager = CertManager::new(&mock);

        assert!(manager.certificate_exists("abc", Some("My")).unwrap());
        assert!(!manager.certificate_exists("abc", None).unwrap());
        assert!(manager
            .link_cert_with_container(Path::new("c.cer"), "alice")
            .unwrap());

        let calls = mock.calls.borrow();
        assert_eq!(calls[0].1, args(["-list", "-thumbprint", "abc", "-store", "My"]));
        assert_eq!(calls[1].1, args(["-list", "-thumbprint", "abc"]));
        assert_eq!(
            calls[2].1,
            args(["-inst", "-inst_to_cont", "-file", "c.cer", "-cont", "alice", "-silent"])
        );
    }

    #[test]
    fn get_container_reports_missing_part() {
        let mock = MockExec::with(vec![(true, LISTING)]);
        let err = CertManager::new(&mock).get_container("carol").unwrap_err();
        assert!(matches!(err, ToolError::ContainerNotFound(ref part) if part == "carol"));
    }

    #[test]
    fn copy_container_maps_known_error_codes() {
        let mock = MockExec::with(vec![(false, "Error: ErrorCode: 0x8009000b")]);
        let err = CertManager::new(&mock)
            .copy_container(&alice(), "\\\\.\\HDIMAGE\\copy")
            .unwrap_err();
        assert!(matches!(err, ToolError::ContainerNotExportable));

        let mock = MockExec::with(vec![
            (false, "Error: ErrorCode: 0x8009000f"),
            (true, LISTING),
        ]);
        let err = CertManager::new(&mock)
            .copy_container(&alice(), "alice-renamed")
            .unwrap_err();
        match err {
            ToolError::ContainerExists { container } => {
                assert_eq!(container.container_name, "\\\\.\\HDIMAGE\\alice-renamed");
            }
            other => panic!("expected ContainerExists, got {other:?}"),
        }
    }

    #[test]
    fn rename_copies_then_deletes_original() {
        let mock = MockExec::with(vec![
            (true, "[ErrorCode: 0x00000000]"),
            (true, LISTING),
            (true, "[ErrorCode: 0x00000000]"),
        ]);
        let renamed = CertManager::new(&mock)
            .rename_container(&alice(), "alice-renamed")
            .unwrap();

        assert_eq!(renamed.container_name, "\\\\.\\HDIMAGE\\alice-renamed");
        let calls = mock.calls.borrow();
        assert_eq!(
            calls[0].1,
            args([
                "-keycopy",
                "-contsrc",
                "\\\\.\\HDIMAGE\\HDIMAGE\\\\alice.000\\1A2B",
                "-contdest",
                "\\\\.\\HDIMAGE\\alice-renamed",
                "-silent"
            ])
        );
        assert_eq!(
            calls[2],
            (
                Tool::CertMgr,
                args(["-delete", "-container", "\\\\.\\HDIMAGE\\HDIMAGE\\\\alice.000\\1A2B"])
            )
        );
    }

    #[test]
    fn rename_to_same_name_runs_nothing() {
        let mock = MockExec::with(vec![]);
        let same = CertManager::new(&mock)
            .rename_container(&alice(), "alice")
            .unwrap();
        assert_eq!(same, alice());
        assert!(mock.calls.borrow().is_empty());
    }

    #[test]
    fn rename_onto_existing_container_keeps_original() {
        let mock = MockExec::with(vec![
            (false, "ErrorCode: 0x8009000f"),
            (true, LISTING),
        ]);
        let kept = CertManager::new(&mock)
            .rename_container(&alice(), "alice-renamed")
            .unwrap();
        assert_eq!(kept, alice());
        assert_eq!(mock.calls.borrow().len(), 2);
    }

    #[test]
    fn export_and_install_build_args() {
        let mock = MockExec::with(vec![
            (true, "[ErrorCode: 0x00000000]"),
            (false, "ErrorCode: 0x8009000b"),
            (true, "[ErrorCode: 0x00000000]"),
        ]);
        let manager = CertManager::new(&mock);

        let path = manager
            .export_container_to_pfx(Path::new("out.pfx"), "alice", Some("pw"))
            .unwrap();
        assert_eq!(path, PathBuf::from("out.pfx"));
        assert!(matches!(
            manager
                .export_container_to_pfx(Path::new("out.pfx"), "locked", None)
                .unwrap_err(),
            ToolError::ContainerNotExportable
        ));
        manager
            .install_certificate(Path::new("root.cer"), Some("Root"), true)
            .unwrap();

        let calls = mock.calls.borrow();
        assert_eq!(
            calls[0].1,
            args(["-export", "-container", "alice", "-pfx", "-dest", "out.pfx", "-pin", "pw"])
        );
        assert_eq!(
            calls[2].1,
            args(["-inst", "-file", "root.cer", "-store", "Root", "-autodist"])
        );
    }

    #[test]
    fn container_serializes_camel_case() {
        let value = serde_json::to_value(alice()).unwrap();
        assert_eq!(value["containerName"], "\\\\.\\HDIMAGE\\alice");
        assert!(value.get("uniqueContainerName").is_some());
    }
}
