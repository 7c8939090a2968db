use bridge_traits::{BridgeError, HttpClient, HttpRequest, HttpResponse};
use std::time::Duration;

/// Send `request` with `timeout` applied both to the request and to the
/// await itself, so a transport that ignores the request timeout is still
/// bounded. Every failure comes back as a transport message.
pub(crate) async fn execute_bounded(
    http: &dyn HttpClient,
    request: HttpRequest,
    timeout: Duration,
) -> Result<HttpResponse, String> {
    let request = request.timeout(timeout);
    match tokio::time::timeout(timeout, http.execute(request)).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(BridgeError::Timeout(elapsed))) => {
            Err(format!("request timed out after {:?}", elapsed))
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("request timed out after {:?}", timeout)),
    }
}
