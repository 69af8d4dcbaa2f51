//! Property-based tests for CONDUIT
//!
//! Uses proptest to verify the buffering and proxy-bypass invariants across
//! large input spaces.

use proptest::prelude::*;

// ============================================================================
// Buffered Read Properties
// ============================================================================

mod read_properties {
    use super::*;
    use conduit_core::{ReadAhead, buffered_read};
    use conduit_integration_tests::test_helpers::ScriptedTransport;

    /// Cut `data` into pieces of the given sizes, the last piece taking
    /// whatever is left
    fn split(data: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
        let mut pieces = Vec::new();
        let mut rest = data;
        for &size in sizes {
            if rest.is_empty() {
                break;
            }
            let (head, tail) = rest.split_at(size.min(rest.len()));
            pieces.push(head.to_vec());
            rest = tail;
        }
        if !rest.is_empty() {
            pieces.push(rest.to_vec());
        }
        pieces
    }

    proptest! {
        /// Reads reassemble exactly what the transport delivered, whatever
        /// the chunking, request sizes and cache capacity
        #[test]
        fn read_reassembly(
            data in prop::collection::vec(any::<u8>(), 1..512),
            chunk_sizes in prop::collection::vec(1usize..64, 1..32),
            request_sizes in prop::collection::vec(1usize..100, 1..32),
            capacity in 1usize..600,
        ) {
            let mut transport = ScriptedTransport::with_chunks(split(&data, &chunk_sizes));
            let mut cache = ReadAhead::new(capacity);

            let mut received = Vec::new();
            for request in split(&data, &request_sizes) {
                let mut out = vec![0u8; request.len()];
                let n = buffered_read(&mut cache, &mut transport, &mut out).unwrap();
                prop_assert_eq!(n, out.len());
                prop_assert!(cache.is_consistent());
                received.extend_from_slice(&out);
            }
            prop_assert_eq!(received, data);
        }

        /// Asking for exactly what the cache holds never touches the
        /// transport
        #[test]
        fn boundary_read_served_from_cache(
            data in prop::collection::vec(any::<u8>(), 2..256),
            first in 1usize..128,
        ) {
            let first = first.min(data.len() - 1);
            let mut transport = ScriptedTransport::with_chunks([data.clone()]);
            let mut cache = ReadAhead::new(512);

            let mut out = vec![0u8; first];
            buffered_read(&mut cache, &mut transport, &mut out).unwrap();
            let available = cache.available();
            prop_assume!(available > 0);

            let calls = transport.read_calls();
            let mut rest = vec![0u8; available];
            buffered_read(&mut cache, &mut transport, &mut rest).unwrap();
            prop_assert_eq!(transport.read_calls(), calls);
            prop_assert_eq!(&rest[..], &data[first..first + available]);
        }
    }
}

// ============================================================================
// Buffered Write Properties
// ============================================================================

mod write_properties {
    use super::*;
    use conduit_core::{WriteBuffer, buffered_write};
    use conduit_integration_tests::test_helpers::ScriptedTransport;

    proptest! {
        /// Two writes that fit together go out as one transport write,
        /// in order
        #[test]
        fn writes_coalesce(
            first in prop::collection::vec(any::<u8>(), 1..128),
            second in prop::collection::vec(any::<u8>(), 1..128),
            slack in 0usize..64,
        ) {
            let capacity = first.len() + second.len() + slack;
            let mut transport = ScriptedTransport::default();
            let mut wbuf = WriteBuffer::new(capacity);

            prop_assert_eq!(buffered_write(&mut wbuf, &mut transport, &first, false).unwrap(), first.len());
            prop_assert_eq!(buffered_write(&mut wbuf, &mut transport, &second, false).unwrap(), second.len());
            prop_assert!(transport.script().writes.is_empty());

            buffered_write(&mut wbuf, &mut transport, &[], true).unwrap();
            let writes = transport.script().writes.clone();
            prop_assert_eq!(writes.len(), 1);
            prop_assert_eq!(writes[0].clone(), [first, second].concat());
            prop_assert!(wbuf.is_empty());
        }

        /// A short assembled write never credits previously buffered bytes
        /// to the new data
        #[test]
        fn partial_write_accounting(
            buffered in prop::collection::vec(any::<u8>(), 1..64),
            data in prop::collection::vec(any::<u8>(), 1..64),
            limit in 1usize..128,
        ) {
            let capacity = 128;
            prop_assume!(limit < buffered.len() + data.len());
            let mut transport = ScriptedTransport::default();
            let mut wbuf = WriteBuffer::new(capacity);

            buffered_write(&mut wbuf, &mut transport, &buffered, false).unwrap();
            transport.script().write_limits.push_back(limit);
            let accepted = buffered_write(&mut wbuf, &mut transport, &data, true).unwrap();

            prop_assert!(accepted <= data.len());
            prop_assert!(accepted <= limit.saturating_sub(buffered.len()));
            // Everything not sent is still held, nothing is duplicated
            prop_assert_eq!(wbuf.len(), buffered.len() + data.len() - limit);
        }
    }
}

// ============================================================================
// Proxy Bypass Properties
// ============================================================================

mod proxy_properties {
    use super::*;
    use conduit_core::{NetConfig, Protocol, ProxyKind, detect_proxy, is_local_host};

    fn both_proxies() -> NetConfig {
        NetConfig::default()
            .with_http_proxy("proxy.example.com:8080")
            .with_socks_proxy("socks.example.com:1080")
    }

    fn any_protocol() -> impl Strategy<Value = Protocol> {
        prop_oneof![Just(Protocol::Tcp), Just(Protocol::Udp), Just(Protocol::Http)]
    }

    /// Mixed-case spelling of `name`
    fn recase(name: &str, mask: u32) -> String {
        name.chars()
            .enumerate()
            .map(|(i, c)| {
                if mask & (1 << (i % 32)) != 0 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    }

    proptest! {
        /// Loopback addresses are never proxied
        #[test]
        fn ipv4_loopback_bypasses(
            octets in prop::array::uniform3(any::<u8>()),
            protocol in any_protocol(),
            tunnel in any::<bool>(),
        ) {
            let host = format!("127.{}.{}.{}", octets[0], octets[1], octets[2]);
            prop_assert!(is_local_host(&host));
            prop_assert!(detect_proxy(protocol, &host, tunnel, &both_proxies()).is_none());
        }

        /// `localhost` is local however it is capitalised
        #[test]
        fn localhost_spellings_bypass(
            mask in any::<u32>(),
            trailing_dot in any::<bool>(),
            protocol in any_protocol(),
        ) {
            let mut host = recase("localhost", mask);
            if trailing_dot {
                host.push('.');
            }
            prop_assert!(detect_proxy(protocol, &host, false, &both_proxies()).is_none());
            prop_assert!(detect_proxy(Protocol::Tcp, "::1", false, &both_proxies()).is_none());
        }

        /// Remote HTTP targets always use the HTTP proxy, never SOCKS
        #[test]
        fn remote_http_prefers_http_proxy(
            label in "[a-z][a-z0-9]{0,20}",
            tunnel in any::<bool>(),
        ) {
            let host = format!("{label}.example.org");
            let route = detect_proxy(Protocol::Http, &host, tunnel, &both_proxies()).unwrap();
            prop_assert!(route.kind().is_http());
            prop_assert_eq!(route.kind() == ProxyKind::HttpTunnel, tunnel);
            prop_assert_eq!(route.url(), "proxy.example.com:8080");
        }
    }
}
