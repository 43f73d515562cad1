//! The resolver chain: an ordered, immutable sequence of sources. A
//! reconfigure replaces the whole chain at once rather than mutating it
//! in place.

use std::sync::Arc;

use metrics::{counter, increment_counter};
use tracing::warn;

use crate::protocols::protocol::{DnsPacket, QueryType, ResultCode};
use crate::sources::{Source, SourceError};

/// Declared order is `[Blocker, Static, CacheSource, CacheFeeder(Upstream)]`,
/// assembled by the supervisor at startup/reconfigure time.
pub struct Chain {
    sources: Vec<Arc<dyn Source>>,
}

impl Chain {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        Chain { sources }
    }

    /// Resolves one request into a reply, per the policy in `spec.md` §4.4:
    /// the first source to answer wins, `NotFound` falls through, any other
    /// error is logged and treated as a fall-through too, and an empty
    /// chain (or an all-miss chain) yields NXDOMAIN — unless the last
    /// source attempted failed with a transport-level error, in which case
    /// the reply is SERVFAIL instead.
    ///
    /// This implementation answers only the first question of a request
    /// and returns FORMERR for queries carrying more than one — the
    /// simpler of the two options the multi-question open question left
    /// undecided.
    pub async fn resolve(&self, request: &DnsPacket) -> DnsPacket {
        let mut reply = DnsPacket::new();
        reply.header.id = request.header.id;
        reply.header.response = true;
        reply.header.recursion_desired = request.header.recursion_desired;
        reply.header.recursion_available = true;

        if request.questions.len() != 1 {
            reply.header.rescode = ResultCode::FORMERR;
            reply.questions = request.questions.clone();
            return reply;
        }

        increment_counter!("dns_queries_total");

        let question = request.questions[0].clone();
        reply.questions.push(question.clone());

        let qtype = match question.qtype {
            QueryType::A | QueryType::AAAA => question.qtype,
            QueryType::Other(_) => {
                // Non-A/AAAA queries are never answered locally; this chain
                // only speaks the typed A/AAAA source interface.
                reply.header.rescode = ResultCode::NOTIMP;
                return reply;
            }
        };

        let mut last_error = None;
        for (idx, source) in self.sources.iter().enumerate() {
            let outcome = match qtype {
                QueryType::A => source.resolve_v4(&question.name).await,
                QueryType::AAAA => source.resolve_v6(&question.name).await,
                QueryType::Other(_) => unreachable!("filtered above"),
            };

            match outcome {
                Ok(record) => {
                    counter!("dns_source_hits_total", 1, "index" => source_label(idx));
                    reply.header.rescode = ResultCode::NOERROR;
                    reply.header.answers = 1;
                    reply.answers.push(record);
                    return reply;
                }
                Err(SourceError::NotFound) => continue,
                Err(err) => {
                    counter!("dns_source_errors_total", 1, "index" => source_label(idx));
                    warn!(name = %question.name, error = %err, "source failed, falling through");
                    last_error = Some(err);
                }
            }
        }

        reply.header.rescode = match last_error {
            Some(SourceError::TransportError(_)) | Some(SourceError::Timeout) => ResultCode::SERVFAIL,
            _ => ResultCode::NXDOMAIN,
        };
        if reply.header.rescode == ResultCode::NXDOMAIN {
            increment_counter!("dns_nxdomain_total");
        }
        reply
    }
}

/// `metrics` label values need a `'static` lifetime; the chain position is
/// small and fixed, so a lookup table avoids allocating a string per query.
fn source_label(idx: usize) -> &'static str {
    const LABELS: [&str; 8] = ["0", "1", "2", "3", "4", "5", "6", "7"];
    LABELS.get(idx).copied().unwrap_or("other")
}
