//! Generate JSON test vectors for front-end interop testing.
//!
//! Run with: cargo run --package protocol --example test_vectors

use std::time::{Duration, UNIX_EPOCH};

use protocol::messages::*;
use protocol::{ErrorKind, ErrorMessage};

fn main() {
    let modified = UNIX_EPOCH + Duration::from_secs(1_704_067_200);

    // Requests
    print_request("list", &Request::List { path: "/docs".to_string() });
    print_request(
        "write",
        &Request::Write {
            path: "/docs/hello.txt".to_string(),
            content: b"Hello".to_vec(),
        },
    );
    print_request(
        "move_overwrite",
        &Request::Move {
            source: "/a.txt".to_string(),
            destination: "/archive/a.txt".to_string(),
            overwrite: true,
        },
    );
    print_request(
        "tree",
        &Request::Tree {
            path: "/".to_string(),
            max_depth: Some(2),
        },
    );

    // Responses
    print_response(
        "entries",
        &Response::Entries(vec![
            Entry::directory("/docs/A", modified),
            Entry::file("/docs/b.txt", 100, modified),
        ]),
    );
    print_response(
        "content",
        &Response::Content(Content {
            path: "/docs/hello.txt".to_string(),
            data: b"Hello".to_vec(),
        }),
    );
    print_response(
        "summary",
        &Response::Summary(DirSummary {
            size: 4096,
            files: 3,
            folders: 1,
        }),
    );
    print_response(
        "partial_delete",
        &Response::Error(
            ErrorMessage::new(
                ErrorKind::PartialDelete,
                "partial delete of /x: 1 entries left behind",
                Some("/x".to_string()),
            )
            .with_failed(vec!["/x/b.txt".to_string()]),
        ),
    );
}

fn print_request(name: &str, request: &Request) {
    match request.to_json() {
        Ok(json) => println!("export const request_{} = {};", name, json),
        Err(e) => eprintln!("failed to encode {}: {}", name, e),
    }
}

fn print_response(name: &str, response: &Response) {
    match response.to_json() {
        Ok(json) => println!("export const response_{} = {};", name, json),
        Err(e) => eprintln!("failed to encode {}: {}", name, e),
    }
}
