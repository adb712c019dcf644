use owrt_llb::State;
use tracing::{debug, instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::config::BuildConfig;
use crate::errors::{Error, SolveError};
use crate::executionservice::{ExecutionService, ResultRef};
use crate::fetch::get_config_file;
use crate::graph::config_to_llb;
use crate::signing_keys::SigningKeys;

/// Marshals `state`, has the execution service resolve it, and returns the
/// one reference it must produce.
pub async fn solve_single(
    service: &dyn ExecutionService,
    state: &State,
) -> Result<ResultRef, SolveError> {
    let definition = state.marshal()?;
    debug!(definition.head = %definition.head(), "solving");

    service
        .solve(definition)
        .await
        .map_err(SolveError::Solve)?
        .single_ref()
}

/// Runs a build: fetches and parses the configuration, assembles the build
/// environment, and resolves it. Returns the reference to the resulting
/// filesystem.
#[instrument(skip_all, fields(indicatif.pb_show = 1), err)]
pub async fn build(service: &dyn ExecutionService) -> Result<ResultRef, Error> {
    let span = Span::current();
    span.pb_set_message("Building…");
    span.pb_start();

    let config = get_config_file(service).await.map_err(Error::Fetch)?;
    let config = BuildConfig::from_bytes(&config)?;
    debug!(?config, "parsed configuration");

    let state = config_to_llb(&config, &SigningKeys::builtin())?;

    span.pb_set_message("Resolving build environment…");
    solve_single(service, &state).await.map_err(Error::Resolve)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use owrt_llb::Definition;
    use pretty_assertions::assert_eq;
    use tonic::async_trait;

    use super::build;
    use crate::errors::{Error, SolveError};
    use crate::executionservice::{
        BuildOpts, DummyExecutionService, ExecutionService, MemoryExecutionService, ResultRef,
        SolveResult, Tree,
    };
    use crate::graph::{BUILDER_PACKAGES, CONFIG_PATH};
    use crate::signing_keys::SIGNING_KEYS;

    const OWRTFILE: &str = r#"
mirror = "https://example"

[image]
release = "19.07"
target = "x86"
profile = "64"
packages = ["curl"]
files = []
"#;

    const EXPECTED_JSON: &str = r#"{"Mirror":"https://example","Images":null,"Image":{"Release":"19.07","Target":"x86","Profile":"64","Packages":["curl"],"Files":[]}}"#;

    fn build_opts(opts: &[(&str, &str)]) -> BuildOpts {
        BuildOpts {
            session_id: "session".into(),
            opts: opts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// A memory execution service with a build context holding `files`.
    fn service(opts: &[(&str, &str)], files: &[(&str, &str)]) -> MemoryExecutionService {
        let service = MemoryExecutionService::new(build_opts(opts));
        let mut context = Tree::default();
        for (path, content) in files {
            context
                .insert_file(path, 0o644, Bytes::copy_from_slice(content.as_bytes()))
                .unwrap();
        }
        service.add_local("dockerfile", context).unwrap();
        service
    }

    /// Returns canned solve results, and `config` for every read.
    struct StubExecutionService {
        build_opts: BuildOpts,
        results: Mutex<VecDeque<SolveResult>>,
        config: Bytes,
    }

    impl StubExecutionService {
        fn new(results: impl IntoIterator<Item = SolveResult>) -> Self {
            Self {
                build_opts: build_opts(&[]),
                results: Mutex::new(results.into_iter().collect()),
                config: Bytes::from_static(OWRTFILE.as_bytes()),
            }
        }
    }

    #[async_trait]
    impl ExecutionService for StubExecutionService {
        fn build_opts(&self) -> &BuildOpts {
            &self.build_opts
        }

        async fn solve(&self, _definition: Definition) -> std::io::Result<SolveResult> {
            Ok(self
                .results
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected solve"))
        }

        async fn read_file(&self, _reference: &ResultRef, _path: &str) -> std::io::Result<Bytes> {
            Ok(self.config.clone())
        }

        async fn return_result(&self, _result: Result<ResultRef, String>) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Sets the flag when dropped.
    struct DropGuard(Arc<AtomicBool>);

    impl Drop for DropGuard {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Never answers a solve request.
    #[derive(Default)]
    struct HangingExecutionService {
        build_opts: BuildOpts,
        solves: AtomicUsize,
        dropped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ExecutionService for HangingExecutionService {
        fn build_opts(&self) -> &BuildOpts {
            &self.build_opts
        }

        async fn solve(&self, _definition: Definition) -> std::io::Result<SolveResult> {
            let _guard = DropGuard(self.dropped.clone());
            self.solves.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }

        async fn read_file(&self, _reference: &ResultRef, _path: &str) -> std::io::Result<Bytes> {
            unreachable!("nothing was solved")
        }

        async fn return_result(&self, _result: Result<ResultRef, String>) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn single(id: &str) -> SolveResult {
        SolveResult::Single(ResultRef(id.into()))
    }

    fn multi(n: usize) -> SolveResult {
        SolveResult::Multi(
            (0..n)
                .map(|i| (format!("platform{i}"), ResultRef(format!("ref{i}"))))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[tokio::test]
    async fn end_to_end() {
        let service = service(&[], &[("owrtfile", OWRTFILE)]);

        let reference = build(&service).await.expect("build must succeed");

        assert_eq!(
            EXPECTED_JSON,
            String::from_utf8(service.read_file(&reference, CONFIG_PATH).await.unwrap().to_vec())
                .unwrap()
        );

        for (id, key) in SIGNING_KEYS {
            assert_eq!(
                Bytes::copy_from_slice(key.as_bytes()),
                service
                    .read_file(&reference, &format!("/signingkeys/{id}"))
                    .await
                    .unwrap()
            );
        }

        let executed = service.executed().unwrap();
        assert_eq!(1, executed.len());
        assert!(executed[0][2].ends_with(&BUILDER_PACKAGES.join(" ")));
    }

    /// Without the filename option, `owrtfile` is read.
    #[tokio::test]
    async fn default_filename() {
        let service = service(
            &[],
            &[
                ("owrtfile", OWRTFILE),
                ("router.toml", "mirror = \"https://router\""),
            ],
        );
        let reference = build(&service).await.unwrap();

        assert_eq!(
            EXPECTED_JSON.as_bytes(),
            &service.read_file(&reference, CONFIG_PATH).await.unwrap()[..]
        );
    }

    #[tokio::test]
    async fn filename_option() {
        let service = service(
            &[("filename", "router.toml")],
            &[
                ("owrtfile", OWRTFILE),
                ("router.toml", "mirror = \"https://router\""),
            ],
        );
        let reference = build(&service).await.unwrap();

        let json = service.read_file(&reference, CONFIG_PATH).await.unwrap();
        assert!(
            json.starts_with(br#"{"Mirror":"https://router""#),
            "{json:?}"
        );
    }

    #[tokio::test]
    async fn missing_config_file() {
        let service = service(&[], &[("router.toml", "")]);

        match build(&service).await {
            Err(Error::Fetch(SolveError::ReadFile { path, .. })) => assert_eq!("owrtfile", path),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn parse_error() {
        let service = service(&[], &[("owrtfile", "this is not toml")]);

        assert!(matches!(build(&service).await, Err(Error::Parse(_))));
    }

    #[tokio::test]
    async fn solve_error() {
        let service = DummyExecutionService::default();

        assert!(matches!(
            build(&service).await,
            Err(Error::Fetch(SolveError::Solve(_)))
        ));
    }

    #[tokio::test]
    async fn fetch_without_result() {
        let service = StubExecutionService::new([SolveResult::Empty]);

        assert!(matches!(
            build(&service).await,
            Err(Error::Fetch(SolveError::NoResult))
        ));
    }

    #[tokio::test]
    async fn fetch_with_ambiguous_result() {
        let service = StubExecutionService::new([multi(2)]);

        assert!(matches!(
            build(&service).await,
            Err(Error::Fetch(SolveError::AmbiguousResult(2)))
        ));
    }

    #[tokio::test]
    async fn resolve_without_result() {
        let service = StubExecutionService::new([single("config"), SolveResult::Empty]);

        assert!(matches!(
            build(&service).await,
            Err(Error::Resolve(SolveError::NoResult))
        ));
    }

    #[tokio::test]
    async fn resolve_with_ambiguous_result() {
        let service = StubExecutionService::new([single("config"), multi(3)]);

        assert!(matches!(
            build(&service).await,
            Err(Error::Resolve(SolveError::AmbiguousResult(3)))
        ));
    }

    #[tokio::test]
    async fn resolve_single_result() {
        let service = StubExecutionService::new([single("config"), single("image")]);

        assert_eq!(
            ResultRef("image".into()),
            build(&service).await.expect("must succeed")
        );
    }

    /// A changed configuration reuses the cached software installation.
    #[tokio::test]
    async fn config_change_reuses_toolchain() {
        let service = service(&[], &[("owrtfile", OWRTFILE)]);
        let first = build(&service).await.unwrap();

        let mut context = Tree::default();
        context
            .insert_file(
                "owrtfile",
                0o644,
                Bytes::from_static(b"[image]\npackages = [\"luci\"]"),
            )
            .unwrap();
        service.add_local("dockerfile", context).unwrap();
        let second = build(&service).await.unwrap();

        assert_ne!(
            service.read_file(&first, CONFIG_PATH).await.unwrap(),
            service.read_file(&second, CONFIG_PATH).await.unwrap()
        );
        // the install step ran only once
        assert_eq!(1, service.executed().unwrap().len());
    }

    /// A timeout aborts the build while the execution service is still busy,
    /// dropping the pending request.
    #[tokio::test]
    async fn timeout_aborts_pending_solve() {
        let service = HangingExecutionService::default();

        tokio::time::timeout(Duration::from_millis(100), build(&service))
            .await
            .expect_err("must time out");

        assert_eq!(1, service.solves.load(Ordering::SeqCst));
        assert!(service.dropped.load(Ordering::SeqCst));
    }
}
