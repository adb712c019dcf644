use bytes::Bytes;
use owrt_llb::{LocalOptions, State};
use tracing::{instrument, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::driver::solve_single;
use crate::errors::SolveError;
use crate::executionservice::ExecutionService;
use crate::{DEFAULT_FILENAME, KEY_FILENAME, LOCAL_NAME_CONFIG, SHARED_KEY_HINT};

/// Returns the name of the configuration file in the build context.
pub fn config_filename(service: &dyn ExecutionService) -> &str {
    service
        .build_opts()
        .opts
        .get(KEY_FILENAME)
        .map(String::as_str)
        .filter(|filename| !filename.is_empty())
        .unwrap_or(DEFAULT_FILENAME)
}

/// Returns the graph transferring only the configuration file from the
/// client's build context.
pub fn config_source(filename: &str, session_id: &str) -> Result<State, owrt_llb::Error> {
    Ok(State::local(
        LOCAL_NAME_CONFIG,
        LocalOptions {
            include_patterns: vec![filename.to_string()],
            session_id: Some(session_id.to_string()).filter(|id| !id.is_empty()),
            shared_key_hint: Some(SHARED_KEY_HINT.to_string()),
        },
    )?
    .with_custom_name(format!(
        "[owrtbuilder] loading configuration from {}",
        filename
    )))
}

/// Fetches the configuration file from the client through the execution
/// service, and returns its contents.
#[instrument(skip_all, fields(indicatif.pb_show = 1, filename = tracing::field::Empty), err)]
pub async fn get_config_file(service: &dyn ExecutionService) -> Result<Bytes, SolveError> {
    let filename = config_filename(service);

    let span = Span::current();
    span.record("filename", filename);
    span.pb_set_message(&format!("Loading {}", filename));
    span.pb_start();

    let source = config_source(filename, &service.build_opts().session_id)?;
    let reference = solve_single(service, &source).await?;

    service
        .read_file(&reference, filename)
        .await
        .map_err(|source| SolveError::ReadFile {
            path: filename.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use owrt_llb::{Op, ATTR_LOCAL_INCLUDE_PATTERNS, ATTR_LOCAL_SESSION};
    use rstest::rstest;

    use super::{config_filename, config_source};
    use crate::executionservice::{BuildOpts, DummyExecutionService};

    #[rstest]
    #[case::unset(&[], "owrtfile")]
    #[case::empty(&[("filename", "")], "owrtfile")]
    #[case::set(&[("filename", "router.toml")], "router.toml")]
    #[case::other_opts(&[("target", "x86")], "owrtfile")]
    fn filename(#[case] opts: &[(&str, &str)], #[case] expected: &str) {
        let service = DummyExecutionService::new(BuildOpts {
            session_id: String::new(),
            opts: opts
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        });

        assert_eq!(expected, config_filename(&service));
    }

    #[test]
    fn source() {
        let state = config_source("router.toml", "session").unwrap();
        let vertex = state.output().unwrap();

        assert_eq!(
            Some("[owrtbuilder] loading configuration from router.toml"),
            vertex.custom_name()
        );
        let Op::Local { name, options } = vertex.op() else {
            panic!("expected local source");
        };
        assert_eq!("dockerfile", name);
        assert_eq!(vec!["router.toml".to_string()], options.include_patterns);
        assert_eq!(Some("owrtfile"), options.shared_key_hint.as_deref());

        let Some(owrt_llb::proto::op::Op::Source(source)) = &vertex.to_pb().op else {
            panic!("expected source op");
        };
        assert_eq!("local://dockerfile", source.identifier);
        assert_eq!(
            Some(&r#"["router.toml"]"#.to_string()),
            source.attrs.get(ATTR_LOCAL_INCLUDE_PATTERNS)
        );
        assert_eq!(
            Some(&"session".to_string()),
            source.attrs.get(ATTR_LOCAL_SESSION)
        );
    }

    #[test]
    fn source_without_session() {
        let state = config_source("owrtfile", "").unwrap();
        let Op::Local { options, .. } = state.output().unwrap().op() else {
            panic!("expected local source");
        };
        assert_eq!(None, options.session_id);
    }
}
