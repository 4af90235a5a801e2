use crate::core::{Decision, Object, Operation, Pod, PolicyChain, Request, ResourceKind};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request as HttpRequest, Response};
use kube::core::{admission, DynamicObject};
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use thiserror::Error;
use tracing::{debug, info_span, trace, warn};


/// Serves admission reviews by evaluating them against a policy chain.
#[derive(Clone, Debug)]
pub struct Admission {
    chain: PolicyChain,
    metrics: AdmissionMetrics,
}

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    decisions: Family<DecisionLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DecisionLabels {
    decision: &'static str,
    policy: &'static str,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type AdmissionRequest = admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = admission::AdmissionResponse;
type AdmissionReview = admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<HttpRequest<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: HttpRequest<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: AdmissionReview = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => admission.admit(req),
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(allowed = rsp.allowed, patched = rsp.patch.is_some());
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub fn new(chain: PolicyChain, metrics: AdmissionMetrics) -> Self {
        Self { chain, metrics }
    }

    fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);
        let _span = info_span!(
            "admit",
            uid = %req.uid,
            kind = %req.kind.kind,
            ns = req.namespace.as_deref().unwrap_or_default(),
            name = %req.name,
        )
        .entered();

        let operation = match req.operation {
            admission::Operation::Create => Operation::Create,
            admission::Operation::Update => Operation::Update,
            op => {
                trace!(?op, "Not evaluated");
                return rsp;
            }
        };

        let Some(obj) = req.object else {
            warn!("Admission request is missing an object");
            self.metrics.decide("error", "");
            return rsp.deny("admission request missing 'object'");
        };
        let kind = ResourceKind::from_group_kind(&req.kind.group, &req.kind.kind);
        let (object, original) = match parse_object(&kind, obj) {
            Ok(parsed) => parsed,
            Err(error) => {
                warn!(%error, "Failed to encode object");
                self.metrics.decide("error", "");
                return rsp.deny(error);
            }
        };

        let mut request = Request {
            kind,
            namespace: req.namespace.unwrap_or_default(),
            operation,
            object,
            user: req.user_info.username,
        };
        match self.chain.evaluate(&mut request) {
            Decision::Denied { policy, denial } => {
                let decision = if denial.is_internal() { "error" } else { "denied" };
                self.metrics.decide(decision, policy);
                rsp.deny(denial)
            }
            Decision::Allowed => {
                self.metrics.decide("allowed", "");
                let (Some(before), Some(after)) = (original, request.into_pod()) else {
                    return rsp;
                };
                match diff_pods(&before, &after) {
                    Ok(None) => rsp,
                    Ok(Some(patch)) => rsp.clone().with_patch(patch).unwrap_or_else(|error| {
                        warn!(%error, "Failed to serialize patch");
                        rsp.deny(error)
                    }),
                    Err(error) => {
                        warn!(%error, "Failed to encode pod");
                        rsp.deny(error)
                    }
                }
            }
        }
    }
}

/// Converts a reviewed object into the chain's representation.
///
/// Pods are decoded so that policies can mutate them; a copy is retained so the mutations can be
/// returned as a patch. An object that claims to be a pod but does not decode as one is passed
/// through raw so that policies report it.
fn parse_object(
    kind: &ResourceKind,
    obj: DynamicObject,
) -> Result<(Object, Option<Pod>), serde_json::Error> {
    let value = serde_json::to_value(obj)?;
    if *kind != ResourceKind::Pod {
        return Ok((Object::Raw(value), None));
    }
    match serde_json::from_value::<Pod>(value.clone()) {
        Ok(pod) => Ok((Object::Pod(Box::new(pod.clone())), Some(pod))),
        Err(error) => {
            debug!(%error, "Failed to decode pod");
            Ok((Object::Raw(value), None))
        }
    }
}

/// Describes the changes made to a pod, if any.
fn diff_pods(before: &Pod, after: &Pod) -> Result<Option<json_patch::Patch>, serde_json::Error> {
    let patch = json_patch::diff(&serde_json::to_value(before)?, &serde_json::to_value(after)?);
    Ok((!patch.0.is_empty()).then_some(patch))
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let decisions = Family::default();
        prom.register(
            "admission_decisions",
            "Count of admission decisions by outcome and deciding policy",
            decisions.clone(),
        );
        Self { decisions }
    }

    fn decide(&self, decision: &'static str, policy: &'static str) {
        self.decisions
            .get_or_create(&DecisionLabels { decision, policy })
            .inc();
    }
}
