use assert_matches::assert_matches;
use parsec_connection::protocol::{CancelGreetingAttemptRep, StartGreetingAttemptRep};
use parsec_connection::{invited_cmds, ClaimerStep, GreeterStep, GreetingStepRep};
use parsec_testbed::TestbedEnv;
use parsec_types::{CancelledGreetingAttemptReason, GreeterOrClaimer, PrivateKey};

#[tokio::test]
async fn test_steps_are_exchanged() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let token = env.invitation("alice_new_device").unwrap();
    let greeter = env.cmds(&alice).unwrap();
    let claimer = invited_cmds(env.server.addr(), &env.organization_id, token).unwrap();

    let greeter_attempt = match greeter.invite_greeter_start_greeting_attempt(token).await.unwrap() {
        StartGreetingAttemptRep::Ok { greeting_attempt } => greeting_attempt,
        rep => panic!("unexpected {rep:?}"),
    };
    let claimer_attempt = match claimer
        .invite_claimer_start_greeting_attempt(alice.user_id)
        .await
        .unwrap()
    {
        StartGreetingAttemptRep::Ok { greeting_attempt } => greeting_attempt,
        rep => panic!("unexpected {rep:?}"),
    };
    assert_eq!(greeter_attempt, claimer_attempt);

    let greeter_key = PrivateKey::generate().public_key();
    let claimer_key = PrivateKey::generate().public_key();

    // Skipping ahead is refused
    assert_matches!(
        greeter
            .invite_greeter_step(greeter_attempt, GreeterStep::Number1GetHashedNonce)
            .await,
        Ok(GreetingStepRep::StepTooAdvanced)
    );

    let greeter_side = {
        let greeter = greeter.clone();
        let greeter_key = greeter_key.clone();
        tokio::spawn(async move {
            greeter
                .invite_greeter_step(
                    greeter_attempt,
                    GreeterStep::Number0WaitPeer {
                        public_key: greeter_key,
                    },
                )
                .await
        })
    };
    let rep = claimer
        .invite_claimer_step(
            claimer_attempt,
            ClaimerStep::Number0WaitPeer {
                public_key: claimer_key.clone(),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        rep,
        GreetingStepRep::Ok(GreeterStep::Number0WaitPeer {
            public_key: greeter_key.clone()
        })
    );
    assert_eq!(
        greeter_side.await.unwrap().unwrap(),
        GreetingStepRep::Ok(ClaimerStep::Number0WaitPeer {
            public_key: claimer_key.clone()
        })
    );

    // Replaying a step with other data is refused
    assert_matches!(
        claimer
            .invite_claimer_step(
                claimer_attempt,
                ClaimerStep::Number0WaitPeer {
                    public_key: greeter_key.clone(),
                },
            )
            .await,
        Ok(GreetingStepRep::StepMismatch)
    );
}

#[tokio::test]
async fn test_cancel_wakes_up_peer() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let token = env.invitation("zack").unwrap();
    let greeter = env.cmds(&alice).unwrap();
    let claimer = invited_cmds(env.server.addr(), &env.organization_id, token).unwrap();

    let attempt = match greeter.invite_greeter_start_greeting_attempt(token).await.unwrap() {
        StartGreetingAttemptRep::Ok { greeting_attempt } => greeting_attempt,
        rep => panic!("unexpected {rep:?}"),
    };
    assert_matches!(
        claimer.invite_claimer_start_greeting_attempt(alice.user_id).await,
        Ok(StartGreetingAttemptRep::Ok { greeting_attempt }) if greeting_attempt == attempt
    );

    let waiting = {
        let greeter = greeter.clone();
        tokio::spawn(async move {
            greeter
                .invite_greeter_step(
                    attempt,
                    GreeterStep::Number0WaitPeer {
                        public_key: PrivateKey::generate().public_key(),
                    },
                )
                .await
        })
    };
    tokio::task::yield_now().await;

    assert_matches!(
        claimer
            .invite_claimer_cancel_greeting_attempt(attempt, CancelledGreetingAttemptReason::ManuallyCancelled)
            .await,
        Ok(CancelGreetingAttemptRep::Ok)
    );
    assert_matches!(
        waiting.await.unwrap(),
        Ok(GreetingStepRep::GreetingAttemptCancelled {
            origin: GreeterOrClaimer::Claimer,
            reason: CancelledGreetingAttemptReason::ManuallyCancelled,
            ..
        })
    );
}

#[tokio::test]
async fn test_restarting_replaces_attempt() {
    let env = TestbedEnv::coolorg().await.unwrap();
    let alice = env.device("alice").unwrap();
    let bob = env.device("bob").unwrap();
    let token = env.invitation("zack").unwrap();
    let greeter = env.cmds(&alice).unwrap();

    let first = greeter.invite_greeter_start_greeting_attempt(token).await.unwrap();
    let second = greeter.invite_greeter_start_greeting_attempt(token).await.unwrap();
    assert_ne!(first, second);

    // Only administrators greet users
    assert_matches!(
        env.cmds(&bob).unwrap().invite_greeter_start_greeting_attempt(token).await,
        Ok(StartGreetingAttemptRep::AuthorNotAllowed)
    );
}
