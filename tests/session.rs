pub mod common;

use common::{MockResolver, BODY, HEADERS};
use dkim_engine::{
    header::HeaderFieldError, Config, DomainName, Engine, Error, Operation, Selector,
    SignRequest, SignatureAlgorithm, State, SyntaxError,
};

fn make_request() -> SignRequest {
    SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        SignatureAlgorithm::RsaSha256,
        common::signing_key(),
    )
}

fn misuse(operation: Operation, state: State) -> Error {
    Error::ProtocolMisuse { operation, state }
}

#[tokio::test]
async fn operations_out_of_order() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut session = Engine::default().sign(make_request()).unwrap();

    assert!(session.is_signing());
    assert_eq!(session.state(), State::Created);

    assert_eq!(session.body(BODY), Err(misuse(Operation::Body, State::Created)));
    assert_eq!(session.eoh(), Err(misuse(Operation::Eoh, State::Created)));
    assert_eq!(session.eom().await, Err(misuse(Operation::Eom, State::Created)));
    assert_eq!(session.state(), State::Created);
    assert_eq!(
        session.last_error(),
        Some("operation eom not allowed in state created")
    );

    session.header(HEADERS[1]).unwrap();
    assert_eq!(session.state(), State::CollectingHeaders);

    assert_eq!(session.body(BODY), Err(misuse(Operation::Body, State::CollectingHeaders)));
    assert_eq!(session.state(), State::CollectingHeaders);

    session.eoh().unwrap();
    assert_eq!(session.state(), State::BodyPhase);

    assert_eq!(session.header(HEADERS[2]), Err(misuse(Operation::Header, State::BodyPhase)));
    assert_eq!(session.eoh(), Err(misuse(Operation::Eoh, State::BodyPhase)));
    assert_eq!(session.state(), State::BodyPhase);

    session.body(BODY).unwrap();
    session.body(b"").unwrap();
    session.eom().await.unwrap();
    assert_eq!(session.state(), State::Finalized);

    assert_eq!(session.eom().await, Err(misuse(Operation::Eom, State::Finalized)));
    assert_eq!(session.body(BODY), Err(misuse(Operation::Body, State::Finalized)));
    assert_eq!(session.state(), State::Finalized);
    assert!(session.signature_header_text().is_some());
}

#[tokio::test]
async fn malformed_header_fails_session() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut session = Engine::default().verify(MockResolver::new());

    assert!(!session.is_signing());

    session.header(HEADERS[1]).unwrap();

    assert_eq!(
        session.header("no colon here\r\n"),
        Err(Error::Syntax(SyntaxError::Header(HeaderFieldError)))
    );
    assert_eq!(session.state(), State::Failed);
    assert!(session.last_error().is_some());

    assert_eq!(session.header(HEADERS[2]), Err(misuse(Operation::Header, State::Failed)));
    assert_eq!(session.eoh(), Err(misuse(Operation::Eoh, State::Failed)));
    assert_eq!(session.state(), State::Failed);
}

#[tokio::test]
async fn bare_lf_without_fix_crlf() {
    let _ = tracing_subscriber::fmt::try_init();

    let engine = Engine::new(Config {
        fix_crlf: false,
        ..Default::default()
    });

    let mut session = engine.verify(MockResolver::new());

    assert_eq!(
        session.header("To: you@example.org,\n\tthem@example.org\r\n"),
        Err(Error::Syntax(SyntaxError::Header(HeaderFieldError)))
    );

    let mut session = Engine::default().verify(MockResolver::new());

    assert_eq!(session.header("To: you@example.org,\n\tthem@example.org\n"), Ok(()));
}

#[tokio::test]
async fn release_keeps_results() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut session = Engine::default().sign(make_request()).unwrap();

    let text = common::sign(&mut session, HEADERS, BODY).await;

    session.release();
    assert_eq!(session.state(), State::Released);
    assert_eq!(session.signature_header_text(), Some(text.as_str()));

    session.release();
    assert_eq!(session.state(), State::Released);

    assert_eq!(session.header(HEADERS[1]), Err(misuse(Operation::Header, State::Released)));
    assert_eq!(session.eom().await, Err(misuse(Operation::Eom, State::Released)));
    assert_eq!(session.state(), State::Released);
}

#[tokio::test]
async fn release_before_completion() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut session = Engine::default().verify(MockResolver::new());

    session.header(HEADERS[1]).unwrap();
    session.release();

    assert_eq!(session.state(), State::Released);
    assert!(session.verification_outcome().is_none());
    assert_eq!(session.eoh(), Err(misuse(Operation::Eoh, State::Released)));
}

#[tokio::test]
async fn sessions_are_independent() {
    let _ = tracing_subscriber::fmt::try_init();

    let engine = Engine::default();

    let mut first = engine.sign(make_request()).unwrap();
    let mut second = engine.sign(make_request()).unwrap();

    common::feed(&mut first, HEADERS, BODY);
    second.header(HEADERS[1]).unwrap();

    first.eom().await.unwrap();

    assert_eq!(first.state(), State::Finalized);
    assert_eq!(second.state(), State::CollectingHeaders);
    assert!(second.signature_header_text().is_none());
}
